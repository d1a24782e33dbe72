//! Runs the engine contract suite against both cloud adapters over the mock
//! services.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use fleetsim_storage::{Engine, StorageConfig, conformance};
use fleetsim_storage_cloud::{
    DocumentAdapter, DocumentConnector, MockDocumentService, MockTableService, TableAdapter,
    TableConnector,
};

fn document_engine() -> Engine<DocumentAdapter<MockDocumentService>> {
    let engine = Engine::new(DocumentConnector::from_service(Arc::new(MockDocumentService::new())));
    let config = StorageConfig::builder()
        .storage_type("document")
        .connection_string("AccountEndpoint=https://fleet.documents.example:443/;AccountKey=a2V5;")
        .collection("conformance")
        .build()
        .expect("config");
    engine.init(config).expect("init");
    engine
}

fn table_engine() -> Engine<TableAdapter<MockTableService>> {
    let engine = Engine::new(TableConnector::from_service(Arc::new(MockTableService::new())));
    let config = StorageConfig::builder()
        .storage_type("table")
        .connection_string("AccountName=fleet;AccountKey=a2V5")
        .collection("conformance")
        .build()
        .expect("config");
    engine.init(config).expect("init");
    engine
}

#[tokio::test]
async fn document_adapter_conformance() {
    conformance::run_all(document_engine).await;
}

#[tokio::test]
async fn table_adapter_conformance() {
    conformance::run_all(table_engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn document_concurrent_lockers() {
    conformance::concurrent_lockers_have_one_winner(&document_engine()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn table_concurrent_writers() {
    conformance::concurrent_writers_one_succeeds(&table_engine()).await;
}
