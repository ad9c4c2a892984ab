#[cfg(test)]
mod tests {
    use operator_core::{
        ModelCapabilities, ModelConfig, ModelConfigStore, ModelParameters, ModelStatus, ModelType,
        OperatorError, UsageRecord, UsageSink,
    };
    use operator_memory::*;

    fn model(name: &str, model_type: ModelType, is_default: bool) -> ModelConfig {
        ModelConfig {
            name: name.into(),
            display_name: name.to_uppercase(),
            provider: "openai".into(),
            model_type,
            endpoint_url: "https://api.example.com/v1".into(),
            api_key: Some("sk-test-123456".into()),
            capabilities: ModelCapabilities::default(),
            is_default,
            status: ModelStatus::Active,
            parameters: ModelParameters::default(),
            updated_at: None,
        }
    }

    fn defaults_for(store: &SqliteStore, model_type: ModelType) -> usize {
        store
            .active_model_configs()
            .unwrap()
            .iter()
            .filter(|m| m.model_type == model_type && m.is_default)
            .count()
    }

    // ── Model configuration ────────────────────────────────────

    mod models {
        use super::*;

        #[test]
        fn test_upsert_default_clears_previous_default() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_model_config(&model("a", ModelType::Text, true)).unwrap();
            store.upsert_model_config(&model("b", ModelType::Text, true)).unwrap();
            store.upsert_model_config(&model("img", ModelType::Image, true)).unwrap();

            assert_eq!(defaults_for(&store, ModelType::Text), 1);
            assert_eq!(defaults_for(&store, ModelType::Image), 1);
            assert_eq!(store.default_model(ModelType::Text).unwrap().unwrap().name, "b");
        }

        #[test]
        fn test_upsert_by_name_updates_in_place() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_model_config(&model("a", ModelType::Text, false)).unwrap();
            let mut changed = model("a", ModelType::Text, false);
            changed.display_name = "Renamed".into();
            changed.parameters.temperature = Some(0.2);
            store.upsert_model_config(&changed).unwrap();

            let all = store.all_model_configs().unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].display_name, "Renamed");
            assert_eq!(all[0].parameters.temperature, Some(0.2));
            assert!(all[0].updated_at.is_some());
        }

        #[test]
        fn test_set_default_moves_flag() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_model_config(&model("a", ModelType::Text, true)).unwrap();
            store.upsert_model_config(&model("b", ModelType::Text, false)).unwrap();

            let b = store.set_default("b").unwrap();
            assert!(b.is_default);
            assert_eq!(defaults_for(&store, ModelType::Text), 1);
            assert!(!store.model_by_name("a").unwrap().unwrap().is_default);
        }

        #[test]
        fn test_set_default_rejects_unknown_and_inactive() {
            let store = SqliteStore::open_in_memory().unwrap();
            let mut inactive = model("old", ModelType::Text, false);
            inactive.status = ModelStatus::Inactive;
            store.upsert_model_config(&inactive).unwrap();

            assert!(matches!(store.set_default("nope"), Err(OperatorError::NotFound(_))));
            assert!(matches!(
                store.set_default("old"),
                Err(OperatorError::InvalidParameter(_))
            ));
        }

        #[test]
        fn test_inactive_rows_are_not_active() {
            let store = SqliteStore::open_in_memory().unwrap();
            let mut testing = model("t", ModelType::Text, false);
            testing.status = ModelStatus::Testing;
            store.upsert_model_config(&testing).unwrap();
            store.upsert_model_config(&model("a", ModelType::Text, false)).unwrap();

            let active = store.active_model_configs().unwrap();
            assert_eq!(active.len(), 1);
            assert_eq!(active[0].name, "a");
            assert_eq!(store.all_model_configs().unwrap().len(), 2);
        }

        #[test]
        fn test_soft_delete_frees_name() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_model_config(&model("a", ModelType::Text, true)).unwrap();
            assert!(store.soft_delete_model("a").unwrap());
            assert!(!store.soft_delete_model("a").unwrap());
            assert!(store.model_by_name("a").unwrap().is_none());
            assert!(store.default_model(ModelType::Text).unwrap().is_none());

            // A live row may reuse the name.
            store.upsert_model_config(&model("a", ModelType::Image, false)).unwrap();
            assert_eq!(
                store.model_by_name("a").unwrap().unwrap().model_type,
                ModelType::Image
            );
        }

        #[test]
        fn test_parameters_roundtrip_extras() {
            let store = SqliteStore::open_in_memory().unwrap();
            let mut m = model("seedream", ModelType::Image, false);
            m.provider = "doubao".into();
            m.parameters
                .extra
                .insert("min_pixels".into(), serde_json::json!(3_686_400));
            m.parameters
                .extra
                .insert("watermark".into(), serde_json::json!(false));
            store.upsert_model_config(&m).unwrap();

            let loaded = store.model_by_name("seedream").unwrap().unwrap();
            assert_eq!(loaded.parameters.extra_u64("min_pixels"), Some(3_686_400));
            assert_eq!(loaded.parameters.extra_bool("watermark"), Some(false));
        }

        #[tokio::test]
        async fn test_model_config_store_trait() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_model_config(&model("a", ModelType::Text, true)).unwrap();
            store.upsert_model_config(&model("b", ModelType::Text, false)).unwrap();

            let dyn_store: &dyn ModelConfigStore = &store;
            assert_eq!(dyn_store.find_active_model_configs().await.unwrap().len(), 2);
            let default = dyn_store.find_default_model(ModelType::Text).await.unwrap();
            assert_eq!(default.unwrap().name, "a");
            assert!(dyn_store
                .find_default_model(ModelType::Video)
                .await
                .unwrap()
                .is_none());
        }

        #[test]
        fn test_reopen_persists_rows() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("operator.db");
            {
                let store = SqliteStore::open(&path).unwrap();
                store.upsert_model_config(&model("a", ModelType::Text, true)).unwrap();
            }
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.default_model(ModelType::Text).unwrap().unwrap().name, "a");
        }
    }

    // ── Core ───────────────────────────────────────────────────

    mod core_block {
        use super::*;

        #[test]
        fn test_overwrite_in_place() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_core("u1", &CoreMemoryUpdate::persona("园长助手")).unwrap();
            store.upsert_core("u1", &CoreMemoryUpdate::human("家长, 孩子在大一班")).unwrap();
            let updated = store.upsert_core("u1", &CoreMemoryUpdate::persona("新的助手")).unwrap();

            assert_eq!(updated.persona, "新的助手");
            assert_eq!(updated.human, "家长, 孩子在大一班");
            assert_eq!(updated.persona_limit, operator_memory::core_memory::DEFAULT_BLOCK_LIMIT);
        }

        #[test]
        fn test_text_truncated_to_limit() {
            let store = SqliteStore::open_in_memory().unwrap();
            let update = CoreMemoryUpdate {
                persona: Some("abcdefghij".into()),
                persona_limit: Some(4),
                ..Default::default()
            };
            let core = store.upsert_core("u1", &update).unwrap();
            assert_eq!(core.persona, "abcd");
        }

        #[test]
        fn test_zero_limit_rejected() {
            let store = SqliteStore::open_in_memory().unwrap();
            let update = CoreMemoryUpdate {
                human_limit: Some(0),
                ..Default::default()
            };
            assert!(matches!(
                store.upsert_core("u1", &update),
                Err(OperatorError::InvalidParameter(_))
            ));
        }

        #[test]
        fn test_subjects_are_isolated() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_core("u1", &CoreMemoryUpdate::persona("one")).unwrap();
            assert!(store.get_core("u2").unwrap().is_none());
        }
    }

    // ── Episodic ───────────────────────────────────────────────

    mod episodic {
        use super::*;

        fn event(summary: &str) -> NewEpisodicEvent {
            NewEpisodicEvent::new("user_message", "user", summary)
        }

        #[test]
        fn test_append_only_and_recent_order() {
            let store = SqliteStore::open_in_memory().unwrap();
            let mut seqs = Vec::new();
            for i in 0..5 {
                let before = store.episodic_count("u1").unwrap();
                seqs.push(store.append_episodic("u1", &event(&format!("event {i}"))).unwrap());
                assert_eq!(store.episodic_count("u1").unwrap(), before + 1);
            }
            store.append_episodic("u2", &event("other subject")).unwrap();

            let recent = store.query_recent_episodic("u1", 3).unwrap();
            let summaries: Vec<&str> = recent.iter().map(|e| e.summary.as_str()).collect();
            assert_eq!(summaries, vec!["event 4", "event 3", "event 2"]);
            assert!(recent.windows(2).all(|w| w[0].seq > w[1].seq));
            assert_eq!(recent[0].seq, seqs[4]);
        }

        #[test]
        fn test_recent_with_fewer_rows_than_limit() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.append_episodic("u1", &event("only")).unwrap();
            assert_eq!(store.query_recent_episodic("u1", 10).unwrap().len(), 1);
            assert!(store.query_recent_episodic("nobody", 10).unwrap().is_empty());
        }

        #[test]
        fn test_by_path_prefix() {
            let store = SqliteStore::open_in_memory().unwrap();
            let path = |p: &[&str]| p.iter().map(|s| s.to_string()).collect::<Vec<_>>();
            store
                .append_episodic("u1", &event("a").with_path(&path(&["chat", "attendance"])))
                .unwrap();
            store
                .append_episodic("u1", &event("b").with_path(&path(&["chat", "attendance", "late"])))
                .unwrap();
            store
                .append_episodic("u1", &event("c").with_path(&path(&["chat", "attendances"])))
                .unwrap();

            let hits = store
                .episodic_by_path("u1", &path(&["chat", "attendance"]), 10)
                .unwrap();
            let summaries: Vec<&str> = hits.iter().map(|e| e.summary.as_str()).collect();
            assert_eq!(summaries, vec!["b", "a"]);
            assert_eq!(hits[0].tree_path, path(&["chat", "attendance", "late"]));
        }

        #[test]
        fn test_keyword_search() {
            let store = SqliteStore::open_in_memory().unwrap();
            store
                .append_episodic("u1", &event("asked about FEES").with_details("tuition for May"))
                .unwrap();
            store.append_episodic("u1", &event("asked about lunch")).unwrap();
            assert_eq!(store.search_episodic("u1", "fees", 10).unwrap().len(), 1);
            assert_eq!(store.search_episodic("u1", "tuition", 10).unwrap().len(), 1);
            assert_eq!(store.search_episodic("u1", "asked", 10).unwrap().len(), 2);
        }

        #[test]
        fn test_empty_summary_rejected() {
            let store = SqliteStore::open_in_memory().unwrap();
            assert!(store.append_episodic("u1", &event("  ")).is_err());
            assert_eq!(store.episodic_count("u1").unwrap(), 0);
        }
    }

    // ── Semantic ───────────────────────────────────────────────

    mod semantic {
        use super::*;

        #[test]
        fn test_create_or_update_by_name() {
            let store = SqliteStore::open_in_memory().unwrap();
            let first = store
                .upsert_concept("u1", &ConceptInput::new("大一班", "class of 25 children"))
                .unwrap();
            let second = store
                .upsert_concept(
                    "u1",
                    &ConceptInput::new("大一班", "class of 27 children").with_category("class"),
                )
                .unwrap();
            assert_eq!(first.id, second.id);
            assert_eq!(second.description, "class of 27 children");
            assert_eq!(second.category, "class");
            assert_eq!(store.list_concepts("u1", 10).unwrap().len(), 1);
        }

        #[test]
        fn test_relate_requires_both_concepts() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_concept("u1", &ConceptInput::new("小明", "student")).unwrap();
            let rel = Relation {
                source: "小明".into(),
                target: "大一班".into(),
                relation_type: "member_of".into(),
                strength: 1.0,
            };
            assert!(matches!(store.relate("u1", &rel), Err(OperatorError::NotFound(_))));
        }

        #[test]
        fn test_related_walks_both_directions_to_depth() {
            let store = SqliteStore::open_in_memory().unwrap();
            for name in ["小明", "大一班", "王老师", "幼儿园"] {
                store.upsert_concept("u1", &ConceptInput::new(name, "x")).unwrap();
            }
            let link = |s: &str, t: &str| Relation {
                source: s.into(),
                target: t.into(),
                relation_type: "related".into(),
                strength: 0.5,
            };
            store.relate("u1", &link("小明", "大一班")).unwrap();
            store.relate("u1", &link("王老师", "大一班")).unwrap();
            store.relate("u1", &link("大一班", "幼儿园")).unwrap();

            let one_hop = store.related("u1", "小明", 1).unwrap();
            assert_eq!(one_hop.len(), 1);
            assert_eq!(one_hop[0].0.name, "大一班");

            let two_hops = store.related("u1", "小明", 2).unwrap();
            let mut names: Vec<&str> = two_hops.iter().map(|(c, _)| c.name.as_str()).collect();
            names.sort();
            assert_eq!(names, vec!["大一班", "幼儿园", "王老师"]);
            assert!(two_hops.iter().all(|(c, d)| (c.name == "大一班") == (*d == 1)));
        }

        #[test]
        fn test_relate_twice_updates_strength() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.upsert_concept("u1", &ConceptInput::new("a", "x")).unwrap();
            store.upsert_concept("u1", &ConceptInput::new("b", "y")).unwrap();
            let mut rel = Relation {
                source: "a".into(),
                target: "b".into(),
                relation_type: "likes".into(),
                strength: 0.1,
            };
            store.relate("u1", &rel).unwrap();
            rel.strength = 0.9;
            store.relate("u1", &rel).unwrap();
            let rels = store.relations_of("u1", "b").unwrap();
            assert_eq!(rels.len(), 1);
            assert_eq!(rels[0].strength, 0.9);
        }
    }

    // ── Procedural ─────────────────────────────────────────────

    mod procedural {
        use super::*;

        fn input(steps: Vec<ProcedureStep>) -> ProcedureInput {
            ProcedureInput {
                name: "monthly_attendance_report".into(),
                description: "build the attendance report".into(),
                steps,
            }
        }

        #[test]
        fn test_reinforcement_replaces_steps_and_counts() {
            let store = SqliteStore::open_in_memory().unwrap();
            let first = store
                .upsert_procedure("u1", &input(vec![ProcedureStep::new(1, "query attendance")]))
                .unwrap();
            assert_eq!(first.reinforcement_count, 1);

            let second = store
                .upsert_procedure(
                    "u1",
                    &input(vec![
                        ProcedureStep::new(2, "render chart"),
                        ProcedureStep::new(1, "query attendance"),
                    ]),
                )
                .unwrap();
            assert_eq!(second.id, first.id);
            assert_eq!(second.reinforcement_count, 2);
            assert_eq!(second.steps.len(), 2);
            assert_eq!(second.steps[0].step_number, 1);
            assert!(second.last_reinforced_at >= first.last_reinforced_at);
        }

        #[test]
        fn test_invalid_steps_rejected() {
            let store = SqliteStore::open_in_memory().unwrap();
            assert!(store.upsert_procedure("u1", &input(vec![])).is_err());
            let dup = input(vec![ProcedureStep::new(1, "a"), ProcedureStep::new(1, "b")]);
            assert!(matches!(
                store.upsert_procedure("u1", &dup),
                Err(OperatorError::InvalidParameter(_))
            ));
        }
    }

    // ── Resource ───────────────────────────────────────────────

    mod resource {
        use super::*;

        fn input(label: &str, location: &str) -> ResourceInput {
            ResourceInput {
                kind: ResourceKind::Document,
                label: label.into(),
                location: location.into(),
                summary: None,
                tags: vec!["report".into()],
            }
        }

        #[test]
        fn test_same_location_supersedes() {
            let store = SqliteStore::open_in_memory().unwrap();
            let v1 = store.save_resource("u1", &input("report v1", "oss://r/1.pdf")).unwrap();
            let v2 = store.save_resource("u1", &input("report v2", "oss://r/1.pdf")).unwrap();
            store.save_resource("u1", &input("menu", "oss://r/menu.pdf")).unwrap();

            let live = store.list_resources("u1", 10).unwrap();
            assert_eq!(live.len(), 2);
            assert!(live.iter().all(|r| r.id != v1.id));

            let history = store.resource_history("u1", "oss://r/1.pdf").unwrap();
            assert_eq!(history.len(), 2);
            let old = history.iter().find(|r| r.id == v1.id).unwrap();
            assert_eq!(old.superseded_by.as_deref(), Some(v2.id.as_str()));
            assert_eq!(old.label, "report v1");
        }

        #[test]
        fn test_kind_parse() {
            assert_eq!("image".parse::<ResourceKind>().unwrap(), ResourceKind::Image);
            assert!("video".parse::<ResourceKind>().is_err());
        }
    }

    // ── Knowledge vault ────────────────────────────────────────

    mod vault {
        use super::*;

        #[test]
        fn test_unique_per_domain_topic() {
            let store = SqliteStore::open_in_memory().unwrap();
            store
                .upsert_knowledge("u1", &KnowledgeInput::new("health", "flu season", "v1"))
                .unwrap();
            let updated = store
                .upsert_knowledge("u1", &KnowledgeInput::new("health", "flu season", "v2"))
                .unwrap();
            assert_eq!(updated.content, "v2");
            assert_eq!(store.list_knowledge("u1", None, 10).unwrap().len(), 1);
            assert!(store.list_knowledge("u1", Some("finance"), 10).unwrap().is_empty());
        }

        #[test]
        fn test_validate_rescores() {
            let store = SqliteStore::open_in_memory().unwrap();
            let entry = store
                .upsert_knowledge("u1", &KnowledgeInput::new("policy", "pickup", "id required"))
                .unwrap();
            assert!(entry.validated_at.is_none());

            let validated = store.validate_knowledge("u1", &entry.id, 0.8).unwrap();
            assert_eq!(validated.confidence, 0.8);
            assert!(validated.validated_at.is_some());

            assert!(store.validate_knowledge("u1", &entry.id, 1.5).is_err());
            assert!(matches!(
                store.validate_knowledge("u2", &entry.id, 0.5),
                Err(OperatorError::NotFound(_))
            ));
        }
    }

    // ── Usage ledger ───────────────────────────────────────────

    mod usage {
        use super::*;

        fn record(id: &str, subject: Option<&str>, model: &str, input: u32, output: u32) -> UsageRecord {
            UsageRecord {
                request_id: id.into(),
                subject: subject.map(str::to_string),
                provider: "openai".into(),
                model: model.into(),
                usage_type: ModelType::Text,
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
                cost: ModelParameters::default().cost(input, output),
                duration_ms: 40,
                recorded_at: chrono::Utc::now(),
            }
        }

        #[tokio::test]
        async fn test_sink_writes_rows_read_back_newest_first() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.record_usage(record("r1", Some("u1"), "gpt", 100, 20)).await.unwrap();
            store.record_usage(record("r2", None, "gpt", 50, 5)).await.unwrap();

            let all = store.recent_usage(None, 10).unwrap();
            assert_eq!(all.len(), 2);
            assert_eq!(all[0].request_id, "r2");
            assert_eq!(all[0].subject, None);
            assert_eq!(all[1].total_tokens, 120);
            assert_eq!(all[1].usage_type, ModelType::Text);

            let mine = store.recent_usage(Some("u1"), 10).unwrap();
            assert_eq!(mine.len(), 1);
            assert_eq!(mine[0].request_id, "r1");
        }

        #[test]
        fn test_totals_group_by_model() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.insert_usage(&record("r1", Some("u1"), "gpt", 1000, 0)).unwrap();
            store.insert_usage(&record("r2", Some("u1"), "gpt", 0, 1000)).unwrap();
            store.insert_usage(&record("r3", Some("u2"), "doubao", 10, 10)).unwrap();

            let totals = store.usage_by_model().unwrap();
            assert_eq!(totals.len(), 2);
            let (name, gpt) = &totals[1];
            assert_eq!(name, "gpt");
            assert_eq!(gpt.calls, 2);
            assert_eq!(gpt.total_tokens, 2000);
            assert!((gpt.cost - 0.003).abs() < 1e-9);
        }

        #[test]
        fn test_duplicate_request_id_is_rejected() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.insert_usage(&record("r1", None, "gpt", 1, 1)).unwrap();
            let err = store.insert_usage(&record("r1", None, "gpt", 1, 1)).unwrap_err();
            assert!(matches!(err, OperatorError::Storage(_)));

            let err = store.insert_usage(&record(" ", None, "gpt", 1, 1)).unwrap_err();
            assert!(matches!(err, OperatorError::InvalidParameter(_)));
        }
    }

    // ── Generic row writes ─────────────────────────────────────

    mod rows {
        use super::*;
        use serde_json::json;

        #[test]
        fn test_upsert_memory_row_per_dimension() {
            let store = SqliteStore::open_in_memory().unwrap();
            store
                .upsert_memory_row(Dimension::Core, "u1", &json!({"persona": "helper"}))
                .unwrap();
            store
                .upsert_memory_row(
                    Dimension::Episodic,
                    "u1",
                    &json!({"event_type": "note", "summary": "s", "actor": "system"}),
                )
                .unwrap();
            store
                .upsert_memory_row(
                    Dimension::Semantic,
                    "u1",
                    &json!({"name": "n", "description": "d"}),
                )
                .unwrap();
            store
                .upsert_memory_row(
                    Dimension::Procedural,
                    "u1",
                    &json!({"name": "p", "steps": [{"step_number": 1, "description": "go"}]}),
                )
                .unwrap();
            store
                .upsert_memory_row(
                    Dimension::Resource,
                    "u1",
                    &json!({"kind": "url", "label": "site", "location": "https://k.example"}),
                )
                .unwrap();
            store
                .upsert_memory_row(
                    Dimension::Knowledge,
                    "u1",
                    &json!({"domain": "d", "topic": "t", "content": "c"}),
                )
                .unwrap();

            assert_eq!(store.get_core("u1").unwrap().unwrap().persona, "helper");
            assert_eq!(store.episodic_count("u1").unwrap(), 1);
            assert!(store.get_concept("u1", "n").unwrap().is_some());
            assert!(store.get_procedure("u1", "p").unwrap().is_some());
            assert_eq!(store.list_resources("u1", 5).unwrap().len(), 1);
            assert_eq!(store.list_knowledge("u1", None, 5).unwrap()[0].confidence, 1.0);
        }

        #[test]
        fn test_bad_fields_are_invalid_parameter() {
            let store = SqliteStore::open_in_memory().unwrap();
            let err = store
                .upsert_memory_row(Dimension::Resource, "u1", &json!({"kind": "hologram"}))
                .unwrap_err();
            assert!(matches!(err, OperatorError::InvalidParameter(_)));
        }

        #[test]
        fn test_dimension_parse() {
            assert!("Vault".parse::<Dimension>().is_err());
            assert_eq!("KNOWLEDGE".parse::<Dimension>().unwrap(), Dimension::Knowledge);
            assert_eq!(Dimension::ALL.len(), 6);
        }
    }

    // ── Service ────────────────────────────────────────────────

    mod service {
        use super::*;
        use operator_config::MemoryConfig;

        fn memory() -> SixDimensionMemory {
            let config = MemoryConfig {
                episodic_limit: 2,
                dimension_limit: 2,
                core_block_limit: 10,
                ..MemoryConfig::default()
            };
            SixDimensionMemory::new(SqliteStore::open_in_memory().unwrap(), config)
        }

        #[tokio::test]
        async fn test_new_core_rows_use_configured_limit() {
            let mem = memory();
            let core = mem
                .write_core("u1", CoreMemoryUpdate::persona("0123456789abcdef"))
                .await
                .unwrap();
            assert_eq!(core.persona_limit, 10);
            assert_eq!(core.persona, "0123456789");
        }

        #[tokio::test]
        async fn test_build_context_reads_requested_dimensions() {
            let mem = memory();
            mem.write_core("u1", CoreMemoryUpdate::persona("helper")).await.unwrap();
            for i in 0..3 {
                mem.write_episodic("u1", NewEpisodicEvent::new("note", "user", format!("e{i}")))
                    .await
                    .unwrap();
            }
            mem.write_semantic("u1", ConceptInput::new("午睡", "nap at 12:30"))
                .await
                .unwrap();
            mem.write_semantic("u1", ConceptInput::new("过敏", "peanut allergy"))
                .await
                .unwrap();
            mem.write_knowledge("u1", KnowledgeInput::new("policy", "fees", "due on the 5th"))
                .await
                .unwrap();

            let ctx = mem
                .build_context(
                    "u1",
                    &[Dimension::Core, Dimension::Episodic, Dimension::Semantic],
                    "孩子几点午睡",
                )
                .await;
            assert!(ctx.degraded.is_empty());
            assert_eq!(ctx.core.as_ref().unwrap().persona, "helper");
            assert_eq!(ctx.episodic.len(), 2);
            assert_eq!(ctx.episodic[0].summary, "e2");
            assert_eq!(ctx.semantic.len(), 1);
            assert_eq!(ctx.semantic[0].name, "午睡");
            // Not requested.
            assert!(ctx.knowledge.is_empty());

            let text = ctx.render();
            assert!(text.starts_with("## Persona\nhelper"));
            assert!(text.contains("午睡 (general): nap at 12:30"));
            let e1 = text.find("e1").unwrap();
            let e2 = text.find("e2").unwrap();
            assert!(e1 < e2, "events render oldest first");
        }

        #[tokio::test]
        async fn test_empty_context() {
            let mem = memory();
            let ctx = mem.build_context("nobody", &Dimension::ALL, "hello").await;
            assert!(ctx.is_empty());
            assert!(ctx.degraded.is_empty());
            assert_eq!(ctx.render(), "");
        }

        #[tokio::test]
        async fn test_record_turn_appends_both_sides() {
            let mem = memory();
            let path = vec!["chat".to_string()];
            mem.record_turn("u1", "查询所有学生", "共有 120 名学生", &path).await;
            mem.record_turn("u1", "谢谢", "", &path).await;

            let events = mem.read_episodic("u1", 10).await.unwrap();
            assert_eq!(events.len(), 4);
            assert_eq!(events[0].actor, "assistant");
            assert_eq!(events[0].summary, "(empty)");
            assert_eq!(events[3].details.as_deref(), Some("查询所有学生"));
            assert_eq!(events[3].tree_path, path);
            assert_eq!(mem.write_failures(), 0);
        }

        fn call(name: &str) -> operator_core::ToolCall {
            operator_core::ToolCall {
                id: format!("call-{name}"),
                tool_name: name.into(),
                arguments: serde_json::json!({"target": name}),
            }
        }

        #[tokio::test]
        async fn test_record_turn_learns_mentioned_concepts() {
            let mem = memory();
            mem.write_semantic("u1", ConceptInput::new("student", "our own wording"))
                .await
                .unwrap();
            mem.record_turn("u1", "查询所有学生的考勤", "好的", &["chat".to_string()]).await;

            let store = mem.store();
            let attendance = store.get_concept("u1", "attendance").unwrap().unwrap();
            assert_eq!(attendance.category, "operations");
            let student = store.get_concept("u1", "student").unwrap().unwrap();
            assert_eq!(student.description, "our own wording");
            assert!(store.get_concept("u2", "attendance").unwrap().is_none());
            assert_eq!(mem.write_failures(), 0);
        }

        #[tokio::test]
        async fn test_concept_learning_can_be_disabled() {
            let config = MemoryConfig {
                extract_concepts: false,
                ..MemoryConfig::default()
            };
            let mem = SixDimensionMemory::new(SqliteStore::open_in_memory().unwrap(), config);
            mem.record_turn("u1", "查询所有学生", "好的", &[]).await;
            assert!(mem.store().list_concepts("u1", 10).unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_repeated_tool_sequence_becomes_procedure() {
            let mem = memory();
            let path = vec!["turn".to_string(), "principal".to_string()];
            let calls = [call("any_query"), call("render_component")];
            let pattern = "any_query -> render_component";

            assert!(mem.record_tool_calls("u1", &calls, &path).await.is_none());
            assert!(mem.store().get_procedure("u1", pattern).unwrap().is_none());

            let created = mem.record_tool_calls("u1", &calls, &path).await.unwrap();
            assert_eq!(created.name, pattern);
            assert_eq!(created.reinforcement_count, 1);
            assert_eq!(created.steps.len(), 2);
            assert_eq!(created.steps[0].description, "call any_query");

            let reinforced = mem.record_tool_calls("u1", &calls, &path).await.unwrap();
            assert_eq!(reinforced.reinforcement_count, 2);
            assert_eq!(reinforced.id, created.id);

            // Another order is another pattern.
            let reversed = [call("render_component"), call("any_query")];
            assert!(mem.record_tool_calls("u1", &reversed, &path).await.is_none());
            assert!(mem.record_tool_calls("u1", &[], &path).await.is_none());
            assert_eq!(mem.store().list_procedures("u1", 10).unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_record_artifact_saves_resource() {
            let mem = memory();
            let input = ResourceInput {
                kind: ResourceKind::Video,
                label: "Spring festival".into(),
                location: "https://cdn.example.com/v/1.mp4".into(),
                summary: Some("children dancing".into()),
                tags: vec!["generated".into()],
            };
            let saved = mem.record_artifact("u1", input).await.unwrap();
            assert_eq!(saved.kind, ResourceKind::Video);
            let listed = mem.store().list_resources("u1", 5).unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].location, "https://cdn.example.com/v/1.mp4");
        }

        #[tokio::test]
        async fn test_failed_artifact_write_is_counted() {
            let mem = memory();
            let input = ResourceInput {
                kind: ResourceKind::Image,
                label: "".into(),
                location: "".into(),
                summary: None,
                tags: vec![],
            };
            assert!(mem.record_artifact("u1", input).await.is_none());
            assert_eq!(mem.write_failures(), 1);
        }

        #[tokio::test]
        async fn test_write_row_generic() {
            let mem = memory();
            mem.write_row(
                Dimension::Semantic,
                "u1",
                serde_json::json!({"name": "校车", "description": "bus route 3"}),
            )
            .await
            .unwrap();
            assert_eq!(mem.read_semantic("u1", "").await.unwrap().len(), 1);
        }
    }
}
