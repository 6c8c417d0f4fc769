use super::*;
use crate::database::DistanceMetric;

fn spec(name: &str, dimension: usize) -> CollectionSpec {
    CollectionSpec {
        name: name.to_string(),
        dimension,
        metric: DistanceMetric::L2,
        full_text: true,
    }
}

fn record(file_name: &str, caption: &str, embedding: Vec<f32>) -> ImageRecord {
    ImageRecord {
        file_name: file_name.to_string(),
        file_path: format!("/images/{}", file_name),
        caption: caption.to_string(),
        embedding,
    }
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .create_collection(&spec("images", 2))
        .await
        .expect("should create collection");
    store
        .upsert(
            "images",
            &[
                record("dog.jpg", "dog", vec![0.0, 0.0]),
                record("car.jpg", "car", vec![3.0, 4.0]),
                record("park.jpg", "dog park", vec![1.0, 0.0]),
            ],
        )
        .await
        .expect("should upsert records");
    store
}

#[tokio::test]
async fn create_twice_fails() {
    let store = MemoryStore::new();
    store
        .create_collection(&spec("images", 2))
        .await
        .expect("should create collection");
    assert!(store.create_collection(&spec("images", 2)).await.is_err());
}

#[tokio::test]
async fn upsert_overwrites_by_key() {
    let store = seeded_store().await;
    store
        .upsert("images", &[record("dog.jpg", "puppy", vec![0.5, 0.5])])
        .await
        .expect("should upsert");

    assert_eq!(store.count_rows("images").await.expect("can count"), 3);
    let rows = store
        .text_query("images", "puppy", 10)
        .await
        .expect("can query");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].file_name.as_deref(), Some("dog.jpg"));
}

#[tokio::test]
async fn upsert_rejects_wrong_dimension() {
    let store = seeded_store().await;
    let result = store
        .upsert("images", &[record("bad.jpg", "", vec![1.0, 2.0, 3.0])])
        .await;
    assert!(matches!(
        result,
        Err(ImageSearchError::SchemaConflict {
            expected: 2,
            found: 3,
            ..
        })
    ));
}

#[tokio::test]
async fn rejected_batch_leaves_rows_untouched() {
    let store = seeded_store().await;
    let result = store
        .upsert(
            "images",
            &[
                record("new.jpg", "new", vec![1.0, 1.0]),
                record("dog.jpg", "overwritten", vec![2.0, 2.0]),
                record("bad.jpg", "bad", vec![1.0]),
            ],
        )
        .await;
    assert!(matches!(
        result,
        Err(ImageSearchError::SchemaConflict { found: 1, .. })
    ));

    assert_eq!(store.count_rows("images").await.expect("can count"), 3);
    let rows = store
        .text_query("images", "overwritten", 10)
        .await
        .expect("can query");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn vector_query_orders_by_distance() {
    let store = seeded_store().await;
    let rows = store
        .vector_query("images", &[0.9, 0.0], 3)
        .await
        .expect("can query");

    let names: Vec<_> = rows.iter().filter_map(|r| r.file_name.as_deref()).collect();
    assert_eq!(names, vec!["park.jpg", "dog.jpg", "car.jpg"]);
    assert!(
        rows.windows(2)
            .all(|w| w[0].distance.unwrap_or(0.0) <= w[1].distance.unwrap_or(0.0))
    );
}

#[tokio::test]
async fn text_query_matches_tokens() {
    let store = seeded_store().await;
    let rows = store
        .text_query("images", "Dog", 10)
        .await
        .expect("can query");

    let names: Vec<_> = rows.iter().filter_map(|r| r.file_name.as_deref()).collect();
    assert_eq!(names, vec!["dog.jpg", "park.jpg"]);
    assert!(rows.iter().all(|r| r.score.is_some() && r.distance.is_none()));

    let none = store
        .text_query("images", "do", 10)
        .await
        .expect("can query");
    assert!(none.is_empty(), "substring must not match");
}

#[tokio::test]
async fn queries_on_missing_collection_are_not_found() {
    let store = MemoryStore::new();
    assert!(matches!(
        store.vector_query("nope", &[0.0], 1).await,
        Err(ImageSearchError::NotFound(_))
    ));
    assert!(matches!(
        store.count_rows("nope").await,
        Err(ImageSearchError::NotFound(_))
    ));
}

#[tokio::test]
async fn raw_sql_subset() {
    let store = seeded_store().await;

    let ping = store.raw_sql("SELECT 1").await.expect("ping works");
    assert!(ping.is_empty());

    let rows = store
        .raw_sql("SELECT * FROM images LIMIT 2")
        .await
        .expect("select works");
    assert_eq!(rows.len(), 2);

    assert!(matches!(
        store
            .raw_sql("SELECT * FROM images WHERE caption = 'dog'")
            .await,
        Err(ImageSearchError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn hybrid_query_fuses_both_channels() {
    let store = seeded_store().await;
    let rows = store
        .hybrid_query("images", &[3.0, 4.0], "dog", 3)
        .await
        .expect("can query");

    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.score.is_some()));
    // park.jpg ranks in both lists, so it is never last
    assert_ne!(rows[2].file_name.as_deref(), Some("park.jpg"));
}
