mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{doc, tenant, HarnessBuilder, Script};
use manual_harness_core::answer::AnswerParams;
use manual_harness_core::error::RagError;
use manual_harness_core::language::Language;
use manual_harness_core::models::Origin;
use manual_harness_core::service::ServiceConfig;
use manual_harness_core::store::VectorStore;
use manual_harness_core::usage::{CounterType, Limit};

#[tokio::test]
async fn test_hotel_check_in_scenario() {
    let h = HarnessBuilder::new().build();
    let hotel_a = tenant("hotel-a");
    let hotel_b = tenant("hotel-b");

    h.service
        .ingest_document(&hotel_a, doc("faq.txt", "Check-in is from 15:00."))
        .await
        .unwrap();

    let answer = h
        .service
        .query(&hotel_a, "What time is check-in?", None)
        .await
        .unwrap();
    assert!(!answer.refused, "unexpected refusal: {}", answer.text);
    assert!(answer.text.contains("15:00"));
    assert_eq!(answer.language, Language::En);
    assert_eq!(answer.sources[0].filename, "faq.txt");

    let calls_before = h.generator.calls();
    let other = h
        .service
        .query(&hotel_b, "What time is check-in?", None)
        .await
        .unwrap();
    assert!(other.refused);
    assert_eq!(other.text, Language::En.no_manual());
    assert!(other.sources.is_empty());
    assert_eq!(h.generator.calls(), calls_before);
}

#[tokio::test]
async fn test_empty_tenant_never_calls_generator() {
    let h = HarnessBuilder::new().script(Script::Reply("made up".into())).build();
    for question in ["What is the wifi password?", "朝食は何時ですか？", "Hello"] {
        let answer = h.service.query(&tenant("empty"), question, None).await.unwrap();
        assert!(answer.refused);
        assert!(!answer.degraded);
    }
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_delete_removes_document_from_every_path() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.service
        .ingest_document(&t, doc("pool.txt", "The swimming pool opens at 7:00 and closes at 21:00."))
        .await
        .unwrap();
    h.service
        .ingest_document(&t, doc("gym.txt", "The gym is open all day for registered guests."))
        .await
        .unwrap();

    assert!(h.service.delete_document(&t, "pool.txt").await.unwrap());
    assert!(!h.service.delete_document(&t, "pool.txt").await.unwrap());

    let items = h.service.search(&t, "swimming pool hours", 10).await.unwrap();
    assert!(items.iter().all(|i| i.document_id != "pool.txt"));
    assert!(h.service.lexical_index().search(&t, "swimming pool", 10).unwrap().is_empty());
    assert!(h.service.get_document(&t, "pool.txt").await.unwrap().is_none());

    let docs = h.service.list_documents(&t).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "gym.txt");
}

#[tokio::test]
async fn test_isolation_takes_precedence_over_relevance() {
    let h = HarnessBuilder::new().build();
    let t1 = tenant("t1");
    let t2 = tenant("t2");
    h.service
        .ingest_document(&t1, doc("spa.txt", "Spa treatments can be booked at reception."))
        .await
        .unwrap();
    h.service
        .ingest_document(&t2, doc("parking.txt", "Parking is free. The parking garage entrance is on Main Street."))
        .await
        .unwrap();

    let items = h.service.search(&t1, "Where is the parking garage entrance?", 10).await.unwrap();
    assert!(items.iter().all(|i| i.document_id != "parking.txt"));

    let answer = h
        .service
        .query(&t1, "Where is the parking garage entrance?", None)
        .await
        .unwrap();
    assert!(answer.sources.iter().all(|s| s.document_id != "parking.txt"));
    assert!(!answer.text.contains("Main Street"));
}

#[tokio::test]
async fn test_reingest_is_deterministic_without_orphans() {
    let config = ServiceConfig {
        chunking: manual_harness_core::chunk::ChunkParams {
            chunk_size: 60,
            overlap: 10,
        },
        ..ServiceConfig::default()
    };
    let h = HarnessBuilder::new().config(config).build();
    let t = tenant("t1");
    let text = (0..20)
        .map(|i| format!("Rule number {} applies to every guest.", i))
        .collect::<Vec<_>>()
        .join("\n\n");

    let first = h.service.ingest_document(&t, doc("rules.txt", &text)).await.unwrap();
    let count_after_first = h.vectors.count(&t).await.unwrap();
    let second = h.service.ingest_document(&t, doc("rules.txt", &text)).await.unwrap();

    assert!(!first.replaced);
    assert!(second.replaced);
    assert_eq!(first.chunk_count, second.chunk_count);
    assert_eq!(count_after_first, first.chunk_count);
    assert_eq!(h.vectors.count(&t).await.unwrap(), second.chunk_count);
    assert_eq!(h.service.list_documents(&t).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_shorter_reingest_drops_old_chunks() {
    let config = ServiceConfig {
        chunking: manual_harness_core::chunk::ChunkParams {
            chunk_size: 40,
            overlap: 5,
        },
        ..ServiceConfig::default()
    };
    let h = HarnessBuilder::new().config(config).build();
    let t = tenant("t1");
    let long = "Towels are changed daily. ".repeat(10);
    h.service.ingest_document(&t, doc("d", &long)).await.unwrap();
    let report = h.service.ingest_document(&t, doc("d", "Towels are changed on request.")).await.unwrap();
    assert_eq!(report.chunk_count, 1);
    assert_eq!(h.vectors.count(&t).await.unwrap(), 1);
}

#[tokio::test]
async fn test_document_limit_enforced_on_ingest() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    for i in 0..5 {
        h.service
            .ingest_document(&t, doc(&format!("doc{}", i), &format!("Manual page {}.", i)))
            .await
            .unwrap();
    }
    let err = h
        .service
        .ingest_document(&t, doc("doc5", "One too many."))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RagError::QuotaExceeded { counter: CounterType::Documents, limit: 5, .. }
    ));

    let usage = h.service.get_usage(&t).await.unwrap();
    assert_eq!(usage.plan, "starter");
    assert_eq!(usage.documents.used, 5);
    assert_eq!(usage.documents.limit, Limit::Max(5));
    assert!(h.service.get_document(&t, "doc5").await.unwrap().is_none());

    h.service.set_plan(&t, "pro").await.unwrap();
    h.service.ingest_document(&t, doc("doc5", "Now it fits.")).await.unwrap();
}

#[tokio::test]
async fn test_queries_metered_and_limited() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "Breakfast is served from 7:00.")).await.unwrap();
    for _ in 0..3 {
        h.service.query(&t, "When is breakfast?", None).await.unwrap();
    }
    assert_eq!(h.service.get_usage(&t).await.unwrap().queries.used, 3);

    h.service.set_plan(&t, "enterprise").await.unwrap();
    let snap = h.service.get_usage(&t).await.unwrap();
    assert_eq!(snap.queries.limit, Limit::Unlimited);
}

#[tokio::test]
async fn test_concurrent_queries_count_exactly() {
    let h = Arc::new(HarnessBuilder::new().build());
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "Late checkout costs 20 euros.")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..25 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.service
                .query(&tenant("t1"), "How much is late checkout?", None)
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(h.service.get_usage(&t).await.unwrap().queries.used, 25);
}

#[tokio::test]
async fn test_embedding_failure_queues_retry() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.embedder.failing.store(true, Ordering::SeqCst);

    let err = h
        .service
        .ingest_document(&t, doc("faq", "Pets are welcome in ground floor rooms."))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::EmbeddingService { retry_queued: true, .. }));
    assert_eq!(h.service.list_pending(&t).await.unwrap().len(), 1);
    assert!(h.service.list_documents(&t).await.unwrap().is_empty());
    let usage = h.service.get_usage(&t).await.unwrap();
    assert_eq!(usage.documents.used, 0);
    assert_eq!(usage.storage_bytes.used, 0);

    h.embedder.failing.store(false, Ordering::SeqCst);
    let outcomes = h.service.retry_pending(&t).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].1.is_ok());
    assert!(h.service.list_pending(&t).await.unwrap().is_empty());
    assert_eq!(h.service.list_documents(&t).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_embedding_failure_keeps_previous_version() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "The bar closes at midnight.")).await.unwrap();
    h.embedder.failing.store(true, Ordering::SeqCst);
    assert!(h.service.ingest_document(&t, doc("faq", "The bar closes at 23:00.")).await.is_err());

    let stored = h.service.get_document(&t, "faq").await.unwrap().unwrap();
    assert_eq!(stored.text, "The bar closes at midnight.");
}

#[tokio::test]
async fn test_query_falls_back_to_lexical_when_embedder_down() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.service
        .ingest_document(&t, doc("faq", "The shuttle bus leaves every 30 minutes."))
        .await
        .unwrap();
    h.embedder.failing.store(true, Ordering::SeqCst);

    let items = h.service.search(&t, "shuttle bus", 5).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].origin, Origin::Lexical);
    assert_eq!(items[0].chunk_index, None);

    let answer = h.service.query(&t, "When does the shuttle bus leave?", None).await.unwrap();
    assert!(answer.text.contains("30 minutes"));
}

#[tokio::test]
async fn test_lexical_only_mode() {
    let h = HarnessBuilder::new().lexical_only().build();
    let t = tenant("t1");
    let report = h
        .service
        .ingest_document(&t, doc("faq", "Wi-Fi password is printed on your key card."))
        .await
        .unwrap();
    assert!(!report.embedded);
    assert_eq!(h.vectors.count(&t).await.unwrap(), 0);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);

    let answer = h.service.query(&t, "Where is the wifi password?", None).await.unwrap();
    assert!(answer.text.contains("key card"), "{}", answer.text);
}

#[tokio::test]
async fn test_unrelated_question_refused_with_content_present() {
    let h = HarnessBuilder::new().lexical_only().build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "Checkout is at 11:00.")).await.unwrap();
    let answer = h.service.query(&t, "How should I raise my toddler?", None).await.unwrap();
    assert!(answer.refused);
    assert_eq!(answer.text, Language::En.unrelated_refusal());
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_backend_refusal_detected() {
    let refusal = Language::En.unrelated_refusal().to_string();
    let h = HarnessBuilder::new().script(Script::Reply(refusal.clone())).build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "Check-in is from 15:00.")).await.unwrap();
    let answer = h.service.query(&t, "What time is check-in?", None).await.unwrap();
    assert!(answer.refused);
    assert!(answer.sources.is_empty());
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn test_generation_failure_degrades() {
    let h = HarnessBuilder::new().script(Script::Fail).build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "チェックインは15時からです。")).await.unwrap();
    let answer = h.service.query(&t, "チェックインは何時ですか？", None).await.unwrap();
    assert!(answer.degraded);
    assert!(!answer.refused);
    assert_eq!(answer.language, Language::Ja);
    assert_eq!(answer.text, Language::Ja.system_error());
}

#[tokio::test(start_paused = true)]
async fn test_generation_timeout_degrades() {
    let config = ServiceConfig {
        answer: AnswerParams {
            generation_timeout: Duration::from_secs(2),
            ..AnswerParams::default()
        },
        ..ServiceConfig::default()
    };
    let h = HarnessBuilder::new().script(Script::Hang).config(config).build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "Check-in is from 15:00.")).await.unwrap();
    let answer = h
        .service
        .query(&t, "What time is check-in?", Some(Language::En))
        .await
        .unwrap();
    assert!(answer.degraded);
    assert_eq!(answer.text, Language::En.generation_timeout());
}

#[tokio::test]
async fn test_empty_question_is_invalid_and_not_metered() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    assert!(matches!(
        h.service.query(&t, "   ", None).await,
        Err(RagError::InvalidInput(_))
    ));
    assert_eq!(h.service.get_usage(&t).await.unwrap().queries.used, 0);
}

#[tokio::test]
async fn test_empty_document_rejected() {
    let h = HarnessBuilder::new().build();
    let err = h
        .service
        .ingest_document(&tenant("t1"), doc("blank", " \n\n "))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Extraction(_)));
}

#[tokio::test]
async fn test_rebuild_lexical_index_after_restart() {
    let first = HarnessBuilder::new().lexical_only().build();
    let t = tenant("t1");
    first
        .service
        .ingest_document(&t, doc("faq", "Room service is available until 22:00."))
        .await
        .unwrap();

    let restarted = HarnessBuilder::new()
        .lexical_only()
        .storage(Arc::clone(&first.kv), Arc::clone(&first.vectors))
        .build();
    assert!(restarted.service.search(&t, "room service", 5).await.unwrap().is_empty());
    assert_eq!(restarted.service.rebuild_lexical_index().await.unwrap(), 1);
    let items = restarted.service.search(&t, "room service", 5).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].filename, "faq");
}

#[tokio::test]
async fn test_batch_reports_each_document() {
    let h = HarnessBuilder::new().build();
    let outcomes = h
        .service
        .ingest_batch(
            &tenant("t1"),
            vec![doc("a", "Laundry service on floor 2."), doc("bad/id", "x"), doc("c", "")],
        )
        .await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].1.is_ok());
    assert!(matches!(outcomes[1].1, Err(RagError::InvalidInput(_))));
    assert!(matches!(outcomes[2].1, Err(RagError::Extraction(_))));
}

#[tokio::test]
async fn test_failed_record_commit_keeps_previous_version() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "The bar closes at midnight.")).await.unwrap();
    let vectors_before = h.vectors.count(&t).await.unwrap();
    let documents_used = h.service.get_usage(&t).await.unwrap().documents.used;

    h.faults.fail_doc_writes.store(true, Ordering::SeqCst);
    let err = h
        .service
        .ingest_document(&t, doc("faq", "The bar closes at 23:00."))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Storage(_)));
    h.faults.fail_doc_writes.store(false, Ordering::SeqCst);

    let stored = h.service.get_document(&t, "faq").await.unwrap().unwrap();
    assert_eq!(stored.text, "The bar closes at midnight.");
    assert_eq!(h.service.list_documents(&t).await.unwrap().len(), 1);
    assert_eq!(h.vectors.count(&t).await.unwrap(), vectors_before);
    assert_eq!(h.service.get_usage(&t).await.unwrap().documents.used, documents_used);

    let items = h.service.search(&t, "When does the bar close?", 5).await.unwrap();
    assert!(items.iter().any(|i| i.text.contains("midnight")));
    assert!(items.iter().all(|i| !i.text.contains("23:00")));
    assert_eq!(h.service.lexical_index().search(&t, "midnight", 5).unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_first_commit_leaves_nothing() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.faults.fail_doc_writes.store(true, Ordering::SeqCst);
    assert!(h
        .service
        .ingest_document(&t, doc("faq", "The sauna is on the top floor."))
        .await
        .is_err());

    assert!(h.service.list_documents(&t).await.unwrap().is_empty());
    assert_eq!(h.vectors.count(&t).await.unwrap(), 0);
    assert!(h.service.search(&t, "sauna", 5).await.unwrap().is_empty());
    assert_eq!(h.service.get_usage(&t).await.unwrap().storage_bytes.used, 0);
}

#[tokio::test]
async fn test_unchanged_chunks_reuse_vectors() {
    let config = ServiceConfig {
        chunking: manual_harness_core::chunk::ChunkParams {
            chunk_size: 60,
            overlap: 10,
        },
        ..ServiceConfig::default()
    };
    let h = HarnessBuilder::new().config(config).build();
    let t = tenant("t1");
    let rules: Vec<String> = (0..12)
        .map(|i| format!("Rule number {} applies to every guest.", i))
        .collect();
    let text = rules.join("\n\n");

    let first = h.service.ingest_document(&t, doc("rules.txt", &text)).await.unwrap();
    let embedded = h.embedder.texts.load(Ordering::SeqCst);
    assert_eq!(embedded, first.chunk_count);

    h.service.ingest_document(&t, doc("rules.txt", &text)).await.unwrap();
    assert_eq!(h.embedder.texts.load(Ordering::SeqCst), embedded);

    let mut edited = rules.clone();
    edited[11] = "Rule number 11 applies to staff only.".to_string();
    let third = h
        .service
        .ingest_document(&t, doc("rules.txt", &edited.join("\n\n")))
        .await
        .unwrap();
    let reembedded = h.embedder.texts.load(Ordering::SeqCst) - embedded;
    assert!(reembedded >= 1);
    assert!(reembedded < third.chunk_count);
    assert_eq!(h.vectors.count(&t).await.unwrap(), third.chunk_count);

    let items = h.service.search(&t, "Rule number 11 applies to staff only", 1).await.unwrap();
    assert!(items[0].text.contains("staff only"));
}

#[tokio::test]
async fn test_lexical_supplement_fills_empty_slots() {
    let strict = manual_harness_core::retrieve::RetrievalParams {
        min_vector_score: 0.9,
        ..Default::default()
    };
    let docs = [
        doc("restaurant", "Breakfast restaurant."),
        doc("vouchers", "Vouchers for breakfast are sold at the front desk near the lobby shop and elevators."),
    ];

    let plain = HarnessBuilder::new()
        .config(ServiceConfig {
            retrieval: strict.clone(),
            ..ServiceConfig::default()
        })
        .build();
    let supplemented = HarnessBuilder::new()
        .config(ServiceConfig {
            retrieval: manual_harness_core::retrieve::RetrievalParams {
                lexical_supplement: true,
                ..strict
            },
            ..ServiceConfig::default()
        })
        .build();
    let t = tenant("t1");
    for h in [&plain, &supplemented] {
        for d in docs.clone() {
            h.service.ingest_document(&t, d).await.unwrap();
        }
    }

    let items = plain.service.search(&t, "breakfast restaurant", 5).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].document_id, "restaurant");
    assert_eq!(items[0].origin, Origin::Vector);

    let items = supplemented.service.search(&t, "breakfast restaurant", 5).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].origin, Origin::Vector);
    assert_eq!(items[1].document_id, "vouchers");
    assert_eq!(items[1].origin, Origin::Lexical);
}

#[tokio::test]
async fn test_vector_score_cut_falls_back_to_lexical() {
    let config = ServiceConfig {
        retrieval: manual_harness_core::retrieve::RetrievalParams {
            min_vector_score: 0.99,
            ..Default::default()
        },
        ..ServiceConfig::default()
    };
    let h = HarnessBuilder::new().config(config).build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "Breakfast is served from 7:00.")).await.unwrap();
    assert_eq!(h.vectors.count(&t).await.unwrap(), 1);

    let items = h.service.search(&t, "When is breakfast?", 5).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].origin, Origin::Lexical);

    let answer = h.service.query(&t, "When is breakfast?", None).await.unwrap();
    assert!(!answer.refused);
    assert!(answer.text.contains("7:00"));
}

#[tokio::test]
async fn test_context_budget_limits_cited_sources() {
    let docs = [
        doc("pool.txt", "The pool towel desk is next to the lobby."),
        doc("spa.txt", "The spa towel desk is next to the sauna."),
    ];
    let reply = Script::Reply("Towels are at the desk.".into());
    let tight = HarnessBuilder::new()
        .lexical_only()
        .script(reply.clone())
        .config(ServiceConfig {
            answer: AnswerParams {
                max_context_chars: 120,
                ..AnswerParams::default()
            },
            ..ServiceConfig::default()
        })
        .build();
    let roomy = HarnessBuilder::new().lexical_only().script(reply).build();
    let t = tenant("t1");
    for h in [&tight, &roomy] {
        for d in docs.clone() {
            h.service.ingest_document(&t, d).await.unwrap();
        }
    }

    assert_eq!(tight.service.search(&t, "towel desk", 5).await.unwrap().len(), 2);
    let answer = tight.service.query(&t, "Where is the towel desk?", None).await.unwrap();
    assert_eq!(answer.sources.len(), 1);

    let answer = roomy.service.query(&t, "Where is the towel desk?", None).await.unwrap();
    assert_eq!(answer.sources.len(), 2);
}

#[tokio::test]
async fn test_lone_particle_question_refused() {
    let h = HarnessBuilder::new().lexical_only().build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "チェックインは15時からです。")).await.unwrap();

    let answer = h.service.query(&t, "Wi-Fi パスワード は？", None).await.unwrap();
    assert!(answer.refused);
    assert_eq!(answer.text, Language::Ja.unrelated_refusal());
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_emergency_question_escalated_without_search() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "The fire exit is behind the elevators.")).await.unwrap();
    let embed_calls = h.embedder.calls.load(Ordering::SeqCst);

    let answer = h.service.query(&t, "部屋で火事です！", None).await.unwrap();
    assert!(answer.escalated);
    assert!(!answer.refused);
    assert_eq!(answer.text, Language::Ja.escalation());
    assert!(answer.sources.is_empty());

    let answer = h.service.query(&tenant("empty"), "There is an emergency in room 12", None).await.unwrap();
    assert!(answer.escalated);
    assert_eq!(answer.text, Language::En.escalation());

    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embed_calls);
    assert_eq!(h.service.get_usage(&t).await.unwrap().queries.used, 1);
}

#[tokio::test]
async fn test_blocked_generated_answer_replaced() {
    let h = HarnessBuilder::new()
        .script(Script::Reply("Violence toward staff is never tolerated.".into()))
        .build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "Check-in is from 15:00.")).await.unwrap();

    let answer = h.service.query(&t, "What time is check-in?", None).await.unwrap();
    assert!(answer.refused);
    assert!(!answer.escalated);
    assert_eq!(answer.text, Language::En.unrelated_refusal());
    assert!(answer.sources.is_empty());
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn test_short_generated_answer_replaced() {
    let h = HarnessBuilder::new().script(Script::Reply("  OK \n".into())).build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "チェックインは15時からです。")).await.unwrap();

    let answer = h.service.query(&t, "チェックインは何時ですか？", None).await.unwrap();
    assert!(answer.refused);
    assert_eq!(answer.text, Language::Ja.unrelated_refusal());
}

#[tokio::test]
async fn test_emptied_tenant_partitions_evicted() {
    let h = HarnessBuilder::new().build();
    let t = tenant("t1");
    h.service.ingest_document(&t, doc("faq", "Quiet hours start at 22:00.")).await.unwrap();
    assert_eq!(h.vectors.partition_count(), 1);
    assert_eq!(h.service.lexical_index().partition_count(), 1);

    h.service.delete_document(&t, "faq").await.unwrap();
    assert_eq!(h.vectors.partition_count(), 0);
    assert_eq!(h.service.lexical_index().partition_count(), 0);

    h.service.ingest_document(&t, doc("faq", "Quiet hours start at 23:00.")).await.unwrap();
    assert_eq!(h.service.search(&t, "quiet hours", 5).await.unwrap().len(), 1);
}
