use rentrec::algorithms::*;
use rentrec::services::data_source::{DataSource, SnapshotSource};
use rentrec::services::delivery::LogSink;
use rentrec::services::model_store::{FileModelStore, ModelStore};
use rentrec::services::recommendation::RecommendationService;
use rentrec::services::training::TrainingService;
use rentrec::*;
use std::sync::Arc;

fn catalog() -> Vec<Product> {
    vec![
        Product::new("p1", "Silk Gown")
            .with_tags(AttributeField::Category, "Dress")
            .with_tags(AttributeField::Color, "Red")
            .with_tags(AttributeField::Size, "M")
            .with_stats(100.0, 3, 4.0),
        Product::new("p2", "Silk Gown")
            .with_tags(AttributeField::Category, "Dress")
            .with_tags(AttributeField::Color, "Blue")
            .with_tags(AttributeField::Size, "L")
            .with_stats(110.0, 4, 4.2),
        Product::new("p3", "Batik Shirt")
            .with_tags(AttributeField::Category, "Top")
            .with_tags(AttributeField::Color, "Green")
            .with_tags(AttributeField::Size, "S")
            .with_stats(40.0, 10, 3.1),
        Product::new("p4", "Kebaya Set")
            .with_tags(AttributeField::Category, "Kebaya")
            .with_tags(AttributeField::Color, "Red")
            .with_tags(AttributeField::Size, "M")
            .with_stats(80.0, 1, 5.0),
    ]
}

fn dataset() -> Dataset {
    Dataset {
        products: catalog(),
        users: vec![
            User::new("fresh")
                .with_preference(AttributeField::Category, "Dress")
                .with_preference(AttributeField::Color, "Red")
                .with_preference(AttributeField::Size, "M")
                .with_order_count(1),
            User::new("browser")
                .with_preference(AttributeField::Category, "Top")
                .with_preference(AttributeField::Color, "Green, Red")
                .with_preference(AttributeField::Size, "S")
                .with_order_count(0),
            User::new("loyal").with_order_count(12),
        ],
        interactions: vec![
            Interaction::new("loyal", "p1"),
            Interaction::new("loyal", "p3"),
            Interaction::new("loyal", "p9"),
        ],
    }
}

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.data_source.snapshot_dir = dir.join("data");
    config.storage.model_dir = dir.join("models");
    config.training.hidden_layers = vec![16, 8];
    config.training.epochs = 3;
    config.training.batch_size = 4;
    config
}

#[tokio::test]
async fn test_preference_labels_end_to_end() {
    let products = vec![
        Product::new("P1", "")
            .with_tags(AttributeField::Category, "dress")
            .with_tags(AttributeField::Color, "red"),
        Product::new("P2", "")
            .with_tags(AttributeField::Category, "dress")
            .with_tags(AttributeField::Color, "blue"),
    ];
    let users = vec![User::new("U")
        .with_preference(AttributeField::Category, "dress")
        .with_preference(AttributeField::Color, "red")];

    let fields = [AttributeField::Category, AttributeField::Color];
    let (_, users, products) = reconcile(&encode(&users, &fields), &encode(&products, &fields)).unwrap();

    assert_eq!(label(&users.row(0), &products.row(0)).unwrap(), 2);
    assert_eq!(label(&users.row(0), &products.row(1)).unwrap(), 1);
    assert_eq!(label_matrix(&users, &products).unwrap().row(0).to_vec(), vec![2, 1]);
}

#[tokio::test]
async fn test_retrieval_end_to_end() {
    let products = vec![Product::new("P1", "a"), Product::new("P2", "b")];
    let matrix = Arc::new(
        SimilarityMatrix::from_rows(
            vec!["P1".to_string(), "P2".to_string()],
            vec![vec![1.0, 0.3], vec![0.3, 1.0]],
        )
        .unwrap(),
    );
    let interactions = vec![Interaction::new("U1", "P1")];

    assert_eq!(
        recommend("U1", &interactions, &products, &matrix, 1).unwrap(),
        vec!["P1".to_string()]
    );
    assert!(recommend("U1", &interactions, &products, &matrix, 0).unwrap().is_empty());
    assert!(recommend("nobody", &interactions, &products, &matrix, 2).unwrap().is_empty());
}

#[tokio::test]
async fn test_single_interaction_matches_index_row() {
    let products = catalog();
    let matrix = Arc::new(build_similarity_index(&products, &Default::default()).unwrap());
    let retriever = InteractionRetriever::new(matrix.clone(), &[Interaction::new("u", "p2")]);

    let row = matrix.row(matrix.position("p2").unwrap()).to_vec();
    let mut expected: Vec<usize> = (0..row.len()).collect();
    expected.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
    let expected: Vec<ProductId> = expected.into_iter().map(|i| products[i].id.clone()).collect();

    assert_eq!(retriever.recommend("u", products.len()), expected);
    assert_eq!(retriever.recommend("u", 1), vec!["p2".to_string()]);
}

#[tokio::test]
async fn test_training_pipeline_persists_scorer() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path()));

    let source = SnapshotSource::new(&config.data_source.snapshot_dir);
    source.write_dataset(&dataset()).await.unwrap();
    let store = Arc::new(FileModelStore::from_config(&config.storage));

    let service = TrainingService::new(Arc::new(source), store.clone(), config.clone());
    let report = service.run().await.unwrap();

    assert_eq!(report.users, 2);
    assert_eq!(report.products, 4);
    assert_eq!(report.pairs, 8);
    assert_eq!(report.final_epoch.as_ref().map(|e| e.epoch), Some(3));
    assert_eq!(report.vocabulary_sizes["category"], 3);

    let artifact = store.load(&report.artifact).await.unwrap();
    let latest = store.load_latest().await.unwrap();
    assert_eq!(artifact, latest);

    let scorer = AffinityScorer::from_artifact(&artifact).unwrap();
    assert_eq!(scorer.buckets().num_classes(), 4);
    assert_eq!(scorer.history().len(), 3);
}

#[tokio::test]
async fn test_model_store_rejects_unknown_version() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let source = SnapshotSource::new(&config.data_source.snapshot_dir);
    source.write_dataset(&dataset()).await.unwrap();
    let store = Arc::new(FileModelStore::from_config(&config.storage));
    TrainingService::new(Arc::new(source), store.clone(), config.clone())
        .run()
        .await
        .unwrap();

    let mut artifact = store.load_latest().await.unwrap();
    artifact.format_version = ARTIFACT_FORMAT_VERSION + 1;
    std::fs::write(store.latest_path(), serde_json::to_vec(&artifact).unwrap()).unwrap();

    let err = store.load_latest().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RecError>(),
        Some(RecError::InvalidArtifact(_))
    ));
}

#[tokio::test]
async fn test_training_rejects_uniform_labels() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let mut data = dataset();
    // no preference overlaps anywhere: every label is 0
    data.users = vec![User::new("blank").with_order_count(0)];
    let source = SnapshotSource::new(&config.data_source.snapshot_dir);
    source.write_dataset(&data).await.unwrap();

    let service = TrainingService::new(
        Arc::new(source),
        Arc::new(FileModelStore::from_config(&config.storage)),
        config,
    );
    let err = service.run().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RecError>(),
        Some(RecError::InsufficientLabelDiversity { observed: 1, expected: 4 })
    ));
}

#[tokio::test]
async fn test_recommendation_service_flow() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let source = Arc::new(SnapshotSource::new(&config.data_source.snapshot_dir));
    source.write_dataset(&dataset()).await.unwrap();

    let service = RecommendationService::new(source.clone(), Arc::new(LogSink), None, config.clone());
    let request = RecommendationRequest {
        user_id: "loyal".to_string(),
        num_recommendations: 2,
    };
    assert!(service.get_recommendations(&request).await.is_err());

    let summary = service.refresh().await.unwrap();
    assert_eq!(summary.generation, 1);
    assert_eq!(summary.products, 4);
    assert!(!summary.scorer_loaded);

    let first = service.get_recommendations(&request).await.unwrap();
    assert_eq!(first.recommendations.len(), 2);
    assert_eq!(first.index_generation, 1);
    let cached = service.get_recommendations(&request).await.unwrap();
    assert_eq!(cached.generated_at, first.generated_at);

    service.refresh().await.unwrap();
    let rebuilt = service.get_recommendations(&request).await.unwrap();
    assert_eq!(rebuilt.index_generation, 2);
    assert_eq!(rebuilt.recommendations, first.recommendations);

    let cold = RecommendationRequest {
        user_id: "fresh".to_string(),
        num_recommendations: 3,
    };
    assert!(service.get_recommendations(&cold).await.unwrap().recommendations.is_empty());

    let batch = service.run_batch().await.unwrap();
    assert_eq!(batch.users, 1);
    assert_eq!(batch.delivery.delivered, 1);
    assert!(batch.delivery.failed.is_empty());
}

#[tokio::test]
async fn test_cache_skips_unknown_users_and_respects_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.retrieval.cache_capacity = 1;
    let config = Arc::new(config);
    let source = Arc::new(SnapshotSource::new(&config.data_source.snapshot_dir));
    source.write_dataset(&dataset()).await.unwrap();

    let service = RecommendationService::new(source, Arc::new(LogSink), None, config);
    service.refresh().await.unwrap();

    for i in 0..5 {
        let stranger = RecommendationRequest {
            user_id: format!("stranger-{i}"),
            num_recommendations: 5,
        };
        assert!(service.get_recommendations(&stranger).await.unwrap().recommendations.is_empty());
    }
    assert_eq!(service.cached_responses(), 0);

    let loyal = RecommendationRequest {
        user_id: "loyal".to_string(),
        num_recommendations: 2,
    };
    service.get_recommendations(&loyal).await.unwrap();
    assert_eq!(service.cached_responses(), 1);

    let fresh = RecommendationRequest {
        user_id: "fresh".to_string(),
        num_recommendations: 2,
    };
    service.get_recommendations(&fresh).await.unwrap();
    assert_eq!(service.cached_responses(), 1);

    service.refresh().await.unwrap();
    assert_eq!(service.cached_responses(), 0);
}

#[tokio::test]
async fn test_preference_users_use_trained_scorer() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let source = Arc::new(SnapshotSource::new(&config.data_source.snapshot_dir));
    source.write_dataset(&dataset()).await.unwrap();
    let store: Arc<dyn ModelStore> = Arc::new(FileModelStore::from_config(&config.storage));

    TrainingService::new(source.clone(), store.clone(), config.clone())
        .run()
        .await
        .unwrap();

    let service = RecommendationService::new(source, Arc::new(LogSink), Some(store), config);
    assert!(service.refresh().await.unwrap().scorer_loaded);

    let request = RecommendationRequest {
        user_id: "fresh".to_string(),
        num_recommendations: 3,
    };
    let response = service.get_recommendations(&request).await.unwrap();
    assert_eq!(response.recommendations.len(), 3);
    for id in &response.recommendations {
        assert!(["p1", "p2", "p3", "p4"].contains(&id.as_str()));
    }
}

#[test]
fn test_snapshot_source_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let source = SnapshotSource::new(dir.path());
    tokio_test::block_on(source.write_dataset(&dataset())).unwrap();

    let loaded = tokio_test::block_on(source.fetch_dataset()).unwrap();
    assert_eq!(loaded.products.len(), 4);
    assert_eq!(loaded.users[2].order_count, 12);
    assert_eq!(loaded.interactions.len(), 3);
}

#[test]
fn test_config_validation() {
    let mut config = Config::default();
    assert!(utils::validation::validate_config(&config).is_ok());

    config.training.validation_fraction = 0.95;
    assert!(matches!(
        utils::validation::validate_config(&config),
        Err(RecError::InvalidConfig(_))
    ));
}
