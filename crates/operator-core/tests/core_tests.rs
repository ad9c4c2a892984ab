#[cfg(test)]
mod tests {
    use operator_core::*;

    // ── Message tests ──────────────────────────────────────────

    #[test]
    fn test_message_text_constructor() {
        let msg = Message::text(Role::User, "hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text_content(), "hello");
        assert!(msg.tool_calls.is_empty());
        assert!(!msg.has_images());
    }

    #[test]
    fn test_message_text_joins_blocks() {
        let mut msg = Message::text(Role::Assistant, "Hello ");
        msg.content.push(MessageContent::Text { text: "world".to_string() });
        msg.content.push(MessageContent::ImageUrl { url: "https://x/y.png".into() });
        assert_eq!(msg.text_content(), "Hello \nworld");
        assert!(msg.has_images());
    }

    #[test]
    fn test_role_as_str_matches_serde() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }

    // ── Model types ────────────────────────────────────────────

    #[test]
    fn test_model_type_parse() {
        assert_eq!("TEXT".parse::<ModelType>().unwrap(), ModelType::Text);
        assert_eq!("multimodal".parse::<ModelType>().unwrap(), ModelType::Multimodal);
        let err = "hologram".parse::<ModelType>().unwrap_err();
        assert!(matches!(err, OperatorError::InvalidParameter(_)));
    }

    #[test]
    fn test_model_type_can_chat() {
        assert!(ModelType::Text.can_chat());
        assert!(ModelType::Multimodal.can_chat());
        assert!(!ModelType::Image.can_chat());
        assert!(!ModelType::Video.can_chat());
    }

    #[test]
    fn test_model_parameters_flatten_extras() {
        let params: ModelParameters = serde_json::from_value(serde_json::json!({
            "temperature": 0.3,
            "min_pixels": 3686400,
            "watermark": false
        }))
        .unwrap();
        assert_eq!(params.temperature, Some(0.3));
        assert_eq!(params.extra_u64("min_pixels"), Some(3_686_400));
        assert_eq!(params.extra_bool("watermark"), Some(false));
        assert_eq!(params.max_tokens, None);
    }

    #[test]
    fn test_cost_uses_configured_or_default_prices() {
        let params: ModelParameters = serde_json::from_value(serde_json::json!({
            "input_price_per_1k": 0.01,
            "output_price_per_1k": 0.03
        }))
        .unwrap();
        assert!((params.cost(1000, 500) - 0.025).abs() < 1e-9);
        assert!(params.extra.is_empty());

        let defaults = ModelParameters::default();
        assert!((defaults.cost(1500, 250) - 0.002).abs() < 1e-9);
        assert_eq!(defaults.cost(0, 0), 0.0);
    }

    #[test]
    fn test_cost_is_rounded_to_micro_units() {
        let defaults = ModelParameters::default();
        // 1 * 0.001 / 1000 = 0.000001; 1 output token adds 0.000002
        assert_eq!(defaults.cost(1, 1), 0.000003);
    }

    #[test]
    fn test_masked_key() {
        let mut cfg = ModelConfig {
            name: "m".into(),
            display_name: "M".into(),
            provider: "openai".into(),
            model_type: ModelType::Text,
            endpoint_url: "https://api".into(),
            api_key: Some("sk-abcdefghijkl".into()),
            capabilities: ModelCapabilities::default(),
            is_default: false,
            status: ModelStatus::Active,
            parameters: ModelParameters::default(),
            updated_at: None,
        };
        assert_eq!(cfg.masked_key(), "sk-a****");
        cfg.api_key = None;
        assert_eq!(cfg.masked_key(), "(none)");
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_retryable_taxonomy() {
        let unavailable = OperatorError::ProviderUnavailable {
            provider: "doubao".into(),
            model: "m".into(),
            reason: "HTTP 503".into(),
        };
        let timeout = OperatorError::Timeout {
            provider: "doubao".into(),
            model: "m".into(),
            after_ms: 100,
        };
        let rejected = OperatorError::ProviderRejected {
            provider: "doubao".into(),
            model: "m".into(),
            status: 401,
            reason: "bad key".into(),
        };
        assert!(unavailable.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!OperatorError::InvalidParameter("x".into()).is_retryable());
        assert!(!OperatorError::Configuration("x".into()).is_retryable());
        assert_eq!(rejected.provider_identity(), Some(("doubao", "m")));
        assert!(rejected.to_string().contains("401"));
    }

    #[test]
    fn test_with_identity_retags_provider_errors() {
        let err = OperatorError::Timeout {
            provider: String::new(),
            model: String::new(),
            after_ms: 5,
        }
        .with_identity("openai", "gpt-4o");
        assert_eq!(err.provider_identity(), Some(("openai", "gpt-4o")));

        let untouched = OperatorError::NotFound("x".into()).with_identity("openai", "gpt-4o");
        assert!(untouched.provider_identity().is_none());
    }

    #[test]
    fn test_builtin_tool_catalog() {
        let tools = tool::builtin_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                tool::READ_DATA_RECORD,
                tool::ANY_QUERY,
                tool::RENDER_COMPONENT,
                tool::NAVIGATE_TO_PAGE
            ]
        );
        assert!(tools.iter().all(|t| !t.is_mutating));
    }
}
