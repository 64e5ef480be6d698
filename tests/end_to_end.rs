//! End-to-end scenarios against an on-disk database,
//! exercising the RPC front-end the way a real client would: through
//! `ArchiveRequest`/`ArchiveResponse`, not the internal services
//! directly. Uses `tempfile` for the database file, matching the
//! teacher's on-disk-fixture style of integration test.

use results_archive::model::Annotations;
use results_archive::protocol::{ArchiveRequest, ArchiveResponse};
use results_archive::rpc::ArchiveService;
use results_archive::storage::sqlite::SqliteAdapter;
use std::sync::Arc;
use tokio::sync::watch;

fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

async fn service_with_tempfile() -> (ArchiveService<SqliteAdapter>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("archive.db");
    let storage = SqliteAdapter::open(path.to_str().unwrap())
        .await
        .expect("open sqlite adapter");
    (ArchiveService::new(Arc::new(storage)), dir)
}

#[tokio::test]
async fn s1_create_result_mints_name_id_created_time() {
    let (svc, _dir) = service_with_tempfile().await;
    let response = svc
        .handle(
            ArchiveRequest::CreateResult {
                parent: "namespace/default".to_string(),
                annotations: Annotations::new(),
            },
            no_cancel(),
        )
        .await;
    let result = match response {
        ArchiveResponse::Result { result } => result,
        other => panic!("unexpected response: {other:?}"),
    };
    assert!(result
        .name
        .as_str()
        .starts_with("namespace/default/results/"));
    assert!(!result.id.is_empty());
    assert!(result.created_time.timestamp() > 0);
}

#[tokio::test]
async fn s2_pagination_across_parents_in_name_order() {
    let (svc, _dir) = service_with_tempfile().await;
    for parent in ["ns/a", "ns/b", "ns/a"] {
        svc.handle(
            ArchiveRequest::CreateResult {
                parent: parent.to_string(),
                annotations: Annotations::new(),
            },
            no_cancel(),
        )
        .await;
    }

    let first = svc
        .handle(
            ArchiveRequest::ListResults {
                parent: "ns/".to_string(),
                filter: String::new(),
                page_size: 2,
                page_token: None,
            },
            no_cancel(),
        )
        .await;
    let (first_results, first_token) = match first {
        ArchiveResponse::ListResults {
            results,
            next_page_token,
        } => (results, next_page_token),
        other => panic!("unexpected response: {other:?}"),
    };
    assert_eq!(first_results.len(), 2);
    let token = first_token.expect("a third result remains");

    let second = svc
        .handle(
            ArchiveRequest::ListResults {
                parent: "ns/".to_string(),
                filter: String::new(),
                page_size: 2,
                page_token: Some(token),
            },
            no_cancel(),
        )
        .await;
    match second {
        ArchiveResponse::ListResults {
            results,
            next_page_token,
        } => {
            assert_eq!(results.len(), 1);
            assert!(next_page_token.is_none());
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn s3_masked_update_preserves_immutable_fields_and_etag_check() {
    let (svc, _dir) = service_with_tempfile().await;
    let created = match svc
        .handle(
            ArchiveRequest::CreateResult {
                parent: "ns/default".to_string(),
                annotations: Annotations::new(),
            },
            no_cancel(),
        )
        .await
    {
        ArchiveResponse::Result { result } => result,
        other => panic!("unexpected response: {other:?}"),
    };

    let mut partial = created.clone();
    partial.annotations = std::collections::BTreeMap::from([("k".to_string(), "v".to_string())]);

    let updated = match svc
        .handle(
            ArchiveRequest::UpdateResult {
                name: created.name.to_string(),
                result: partial,
                update_mask: Some(vec!["annotations".to_string()]),
                etag: None,
            },
            no_cancel(),
        )
        .await
    {
        ArchiveResponse::Result { result } => result,
        other => panic!("unexpected response: {other:?}"),
    };
    assert_eq!(updated.name, created.name);
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.created_time, created.created_time);
    assert_eq!(updated.annotations.get("k"), Some(&"v".to_string()));

    // A second update with a stale etag fails with failed-precondition.
    let stale = svc
        .handle(
            ArchiveRequest::UpdateResult {
                name: created.name.to_string(),
                result: updated,
                update_mask: None,
                etag: Some(created.etag.clone()),
            },
            no_cancel(),
        )
        .await;
    match stale {
        ArchiveResponse::Error { error } => assert_eq!(error.code, "failed_precondition"),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn s6_delete_missing_then_existing_then_get_not_found() {
    let (svc, _dir) = service_with_tempfile().await;

    let missing = svc
        .handle(
            ArchiveRequest::DeleteResult {
                name: "ns/default/results/missing".to_string(),
                etag: None,
            },
            no_cancel(),
        )
        .await;
    match missing {
        ArchiveResponse::Error { error } => assert_eq!(error.code, "not_found"),
        other => panic!("unexpected response: {other:?}"),
    }

    let created = match svc
        .handle(
            ArchiveRequest::CreateResult {
                parent: "ns/default".to_string(),
                annotations: Annotations::new(),
            },
            no_cancel(),
        )
        .await
    {
        ArchiveResponse::Result { result } => result,
        other => panic!("unexpected response: {other:?}"),
    };

    let deleted = svc
        .handle(
            ArchiveRequest::DeleteResult {
                name: created.name.to_string(),
                etag: None,
            },
            no_cancel(),
        )
        .await;
    assert!(matches!(deleted, ArchiveResponse::Empty));

    let refetch = svc
        .handle(
            ArchiveRequest::GetResult {
                name: created.name.to_string(),
            },
            no_cancel(),
        )
        .await;
    match refetch {
        ArchiveResponse::Error { error } => assert_eq!(error.code, "not_found"),
        other => panic!("unexpected response: {other:?}"),
    }
}
