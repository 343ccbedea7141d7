//! Integration tests against a live Postgres with the REM extensions.
//!
//! Run with: `P8_DATABASE_URL=... cargo test -p rem-store --features db-tests`

#![cfg(feature = "db-tests")]

use rem_core::{EncryptionMode, EntityIdType, EntityRecord, OntologyId, normalise_key};
use rem_crypto::{EncryptionService, LocalKms};
use rem_store::{install, Db, DbConfig, EntityStore, KvIndex, PgTenantKeyStore, SchemaRegistry, WriteOptions};
use serde_json::json;
use std::sync::Arc;

async fn setup() -> (Db, Arc<EntityStore>, KvIndex) {
    let db = Db::from_config(&DbConfig::from_env()).expect("pool");
    install(&db).await.expect("install");

    let kms = Arc::new(LocalKms::from_key_bytes(vec![11u8; 32]).expect("kms"));
    let keys = Arc::new(PgTenantKeyStore::new(db.clone()));
    let crypto = Arc::new(EncryptionService::new(
        kms,
        keys,
        rem_core::CryptoConfig::default(),
    ));
    let registry = Arc::new(SchemaRegistry::new(db.clone()));
    let store = Arc::new(EntityStore::new(db.clone(), registry, crypto));
    let kv = KvIndex::new(db.clone());
    (db, store, kv)
}

fn ontology_record(name: &str) -> EntityRecord {
    let id = OntologyId::deterministic(name, None);
    let mut record = EntityRecord::new(id.as_uuid());
    record.set_field("name", json!(name));
    record.set_field("uri", json!(format!("rem://test/{name}")));
    record.set_field("content", json!("integration test entity"));
    record.set_field("extracted_data", json!(null));
    record
}

#[tokio::test]
async fn installer_is_rerunnable() {
    let (db, _, kv) = setup().await;
    install(&db).await.expect("second install");
    assert!(kv.verify_all().await.expect("verify").is_empty());
}

#[tokio::test]
async fn kv_sync_tracks_upsert_and_soft_delete() {
    let (_, store, kv) = setup().await;
    let name = "KV Sync Probe Entity";
    let key = normalise_key(name);

    let stored = store
        .upsert("ontologies", ontology_record(name), WriteOptions::default())
        .await
        .expect("upsert");

    let entry = kv.entry(&key, None).await.expect("entry").expect("kv row");
    assert_eq!(entry.entity_type, "ontologies");
    assert_eq!(entry.entity_id, stored.sys.id);

    assert!(store
        .soft_delete("ontologies", stored.sys.id)
        .await
        .expect("delete"));
    assert!(kv.entry(&key, None).await.expect("entry").is_none());
}

#[tokio::test]
async fn upsert_is_idempotent_and_advances_updated_at() {
    let (_, store, _) = setup().await;
    let record = ontology_record("Idempotence Probe");

    let first = store
        .upsert("ontologies", record.clone(), WriteOptions::default())
        .await
        .expect("first upsert");
    let second = store
        .upsert("ontologies", record, WriteOptions::default())
        .await
        .expect("second upsert");

    assert_eq!(first.sys.id, second.sys.id);
    assert_eq!(first.sys.encryption_level, second.sys.encryption_level);
    assert_eq!(first.sys.created_at, second.sys.created_at);
    assert!(second.sys.updated_at >= first.sys.updated_at);
}

#[tokio::test]
async fn encrypted_fields_round_trip_under_platform_mode() {
    let (_, store, _) = setup().await;
    let tenant = "db-contract-tenant";
    store
        .crypto()
        .configure(tenant, EncryptionMode::Platform, None)
        .await
        .expect("configure");

    let mut record = ontology_record("Encrypted Probe");
    record.sys.tenant_id = Some(tenant.to_string());

    let stored = store
        .upsert("ontologies", record, WriteOptions::default())
        .await
        .expect("upsert");
    assert_eq!(
        stored.sys.encryption_level,
        rem_core::EncryptionLevel::Platform
    );

    // The read path decrypts back to the original plaintext.
    let read = store
        .get_required("ontologies", stored.sys.id)
        .await
        .expect("get");
    assert_eq!(read.str_field("content"), Some("integration test entity"));
}

#[tokio::test]
async fn full_rebuild_restores_kv_rows() {
    let (db, store, kv) = setup().await;
    let name = "Rebuild Probe";
    store
        .upsert("ontologies", ontology_record(name), WriteOptions::default())
        .await
        .expect("upsert");

    db.execute("TRUNCATE kv_store", &[]).await.expect("truncate");
    assert!(kv.entry(&normalise_key(name), None).await.expect("entry").is_none());

    kv.rebuild_full().await.expect("rebuild");
    assert!(kv.entry(&normalise_key(name), None).await.expect("entry").is_some());
}
