#[cfg(test)]
mod tests {
    use operator_config::ConfigLoader;
    use operator_config::schema::*;
    use std::io::Write;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_operator_config_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.database.path.to_str(), Some("operator.db"));
        assert_eq!(config.registry.refresh_interval_secs, 60);
        assert_eq!(config.prompt_cache.ttl_secs, 300);
        assert_eq!(config.bridge.request_timeout_secs, 120);
        assert_eq!(config.memory.episodic_limit, 10);
    }

    #[test]
    fn test_selector_config_defaults() {
        let config = SelectorConfig::default();
        assert_eq!(config.max_tools, 3);
        assert_eq!(config.weights["read_data_record"], 4.0);
        assert_eq!(config.weights["any_query"], 3.0);
        assert_eq!(config.weights["render_component"], 2.0);
        assert_eq!(config.weights["navigate_to_page"], 1.0);
        assert_eq!(config.fallback_tools, vec!["read_data_record".to_string()]);
        assert!(!config.role_tools["parent"].contains(&"any_query".to_string()));
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        let warnings = OperatorConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = OperatorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: OperatorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.selector.weights, config.selector.weights);
        assert_eq!(restored.bridge.retry_delay_ms, config.bridge.retry_delay_ms);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[bridge]
request_timeout_secs = 30

[selector]
max_tools = 2
"#;
        let config = ConfigLoader::from_toml(toml_str).unwrap();
        assert_eq!(config.bridge.request_timeout_secs, 30);
        assert_eq!(config.selector.max_tools, 2);
        // Defaults should fill in
        assert_eq!(config.bridge.stream_buffer, 256);
        assert_eq!(config.prompt_cache.ttl_secs, 300);
        assert_eq!(config.selector.weights.len(), 4);
    }

    #[test]
    fn test_role_tools_deserialize() {
        let toml_str = r#"
[selector.role_tools]
teacher = ["read_data_record", "any_query"]
"#;
        let config = ConfigLoader::from_toml(toml_str).unwrap();
        assert_eq!(config.selector.role_tools.len(), 1);
        assert_eq!(config.selector.role_tools["teacher"].len(), 2);
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = OperatorConfig::default();
        config.bridge.request_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("bridge.request_timeout_secs"));
    }

    #[test]
    fn test_zero_ttl_is_error() {
        let mut config = OperatorConfig::default();
        config.prompt_cache.ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_tools_is_error() {
        let mut config = OperatorConfig::default();
        config.selector.max_tools = 0;
        assert!(config.validate().unwrap_err().contains("selector.max_tools"));
    }

    #[test]
    fn test_unknown_tool_is_error() {
        let toml_str = r#"
[selector]
fallback_tools = ["drop_database"]
"#;
        let err = ConfigLoader::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("drop_database"));
    }

    #[test]
    fn test_unknown_role_tool_names_field() {
        let mut config = OperatorConfig::default();
        config
            .selector
            .role_tools
            .insert("principal".into(), vec!["launch_rockets".into()]);
        let err = config.validate().unwrap_err();
        assert!(err.contains("selector.role_tools.principal"));
    }

    #[test]
    fn test_bad_log_format_is_error() {
        let mut config = OperatorConfig::default();
        config.logging.format = "xml".into();
        let err = config.validate().unwrap_err();
        assert!(err.contains("logging.format: unknown log format 'xml'"));
    }

    #[test]
    fn test_bad_log_level_is_error() {
        let mut config = OperatorConfig::default();
        config.logging.level = "loud".into();
        let err = config.validate().unwrap_err();
        assert!(err.contains("logging.level"));
        assert!(!err.contains("logging.format"));
    }

    #[test]
    fn test_zero_procedure_repeats_is_warning() {
        let mut config = OperatorConfig::default();
        config.memory.procedure_min_repeats = 0;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
        assert!(warnings[0].to_string().starts_with("warning memory.procedure_min_repeats"));
    }

    #[test]
    fn test_empty_fallback_is_warning() {
        let mut config = OperatorConfig::default();
        config.selector.fallback_tools.clear();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.field == "selector.fallback_tools"));
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("operator.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[registry]
refresh_interval_secs = 15

[memory]
read_timeout_ms = 250
episodic_limit = 4
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.registry.refresh_interval_secs, 15);
        assert_eq!(config.memory.read_timeout_ms, 250);
        assert_eq!(config.memory.episodic_limit, 4);
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loader.get().selector.max_tools, 3);
    }

    #[test]
    fn test_config_loader_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("operator.toml");
        std::fs::write(&config_path, "[selector]\nmax_tools = 0\n").unwrap();
        assert!(ConfigLoader::load(Some(config_path.as_path())).is_err());
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("operator.toml");

        std::fs::write(&config_path, "[selector]\nmax_tools = 2\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().selector.max_tools, 2);

        std::fs::write(&config_path, "[selector]\nmax_tools = 4\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().selector.max_tools, 4);
    }

    #[test]
    fn test_reload_keeps_current_config_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("operator.toml");

        std::fs::write(&config_path, "[selector]\nmax_tools = 2\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();

        std::fs::write(&config_path, "[selector\nmax_tools = ").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().selector.max_tools, 2);
    }
}
