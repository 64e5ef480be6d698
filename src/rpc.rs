//! RPC front-end: maps wire requests to the mutation service and
//! pagination engine, validates arguments before dispatch, and has no
//! business logic of its own.

use crate::error::{ArchiveError, ArchiveResult};
use crate::filter::{self, Bindings};
use crate::model::{Data, ExecutionRecord, ResultRecord};
use crate::mutation::MutationService;
use crate::name::Name;
use crate::pagination::{self, RowBinder};
use crate::protocol::{ArchiveRequest, ArchiveResponse};
use crate::storage::{Row, StorageAdapter};
use crate::token::ContinuationToken;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Execution-type names this server exposes to filter bindings, mapped
/// from the `content_type` tag on a child Record's `Data` payload.
/// Unrecognized content types are ignored rather than bound.
const EXECUTION_TYPE_CONTENT_TYPES: &[(&str, &str)] = &[
    ("application/vnd.archive.taskrun+json", "taskrun"),
    ("application/vnd.archive.pipelinerun+json", "pipelinerun"),
];

/// Reserved binding key carrying the scanned row's own name, used only by
/// [`ParentScopedFilter`] below — never by a user-supplied filter clause.
const ROW_NAME_BINDING: &str = "__row_name";

/// Wraps a compiled user filter so that "parent scope" is part of what the
/// pagination engine counts as a match, not a post-hoc filter applied after
/// page boundaries are already decided. Folding this in here (rather than
/// filtering `page.results` in `list_results` after the fact) is required:
/// the adaptive batcher and the `page_size + 1` probe only see accurate
/// counts if every predicate that can exclude a row is applied before a row
/// is counted as matched.
struct ParentScopedFilter {
    parent_prefix: String,
    inner: Box<dyn filter::FilterProgram>,
}

impl filter::FilterProgram for ParentScopedFilter {
    fn evaluate(&self, bindings: &Bindings) -> ArchiveResult<bool> {
        let name = bindings
            .get(ROW_NAME_BINDING)
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if !parent_scope_matches(&self.parent_prefix, name) {
            return Ok(false);
        }
        self.inner.evaluate(bindings)
    }
}

/// True iff `row_name` is a Result (never a Record: those carry
/// `/records/`) whose own parent path is exactly `requested_parent` or a
/// descendant of it. Segment-aligned, not a raw string prefix test:
/// `requested_parent = "ns/a"` must not match a row parented under
/// `"ns/ab"`, only under `"ns/a"` itself or `"ns/a/..."`. A trailing
/// slash on `requested_parent` (e.g. `"ns/"`) is normalized away first so
/// both spellings of a recursive listing work.
fn parent_scope_matches(requested_parent: &str, row_name: &str) -> bool {
    if row_name.contains("/records/") {
        return false;
    }
    let Some(idx) = row_name.rfind("/results/") else {
        return false;
    };
    let row_parent = &row_name[..idx];
    let normalized = requested_parent.strip_suffix('/').unwrap_or(requested_parent);
    row_parent == normalized || row_parent.starts_with(&format!("{normalized}/"))
}

pub struct ArchiveService<S: StorageAdapter> {
    storage: Arc<S>,
    mutation: MutationService<S>,
}

impl<S: StorageAdapter + 'static> ArchiveService<S> {
    pub fn new(storage: Arc<S>) -> Self {
        ArchiveService {
            storage: storage.clone(),
            mutation: MutationService::new(storage),
        }
    }

    pub async fn handle(
        &self,
        request: ArchiveRequest,
        cancel: watch::Receiver<bool>,
    ) -> ArchiveResponse {
        ArchiveResponse::from_result(self.dispatch(request, cancel).await)
    }

    async fn dispatch(
        &self,
        request: ArchiveRequest,
        cancel: watch::Receiver<bool>,
    ) -> ArchiveResult<ArchiveResponse> {
        match request {
            ArchiveRequest::CreateResult { parent, annotations } => {
                if parent.is_empty() {
                    return Err(ArchiveError::invalid_argument("parent must not be empty"));
                }
                check_cancelled(&cancel)?;
                let result = self.mutation.create_result(&parent, annotations).await?;
                Ok(ArchiveResponse::Result { result })
            }
            ArchiveRequest::GetResult { name } => {
                let name = Name::new(name);
                let result: ResultRecord = self.mutation.get(&name).await?;
                Ok(ArchiveResponse::Result { result })
            }
            ArchiveRequest::UpdateResult {
                name,
                result,
                update_mask,
                etag,
            } => {
                let name = Name::new(name);
                let etag_ref = etag.as_deref();
                check_cancelled(&cancel)?;
                let updated = match update_mask {
                    Some(mask) => {
                        self.mutation
                            .update_with_mask(&name, result, &mask, etag_ref)
                            .await?
                    }
                    None => self.mutation.update_no_mask(&name, result, etag_ref).await?,
                };
                Ok(ArchiveResponse::Result { result: updated })
            }
            ArchiveRequest::DeleteResult { name, etag } => {
                let name = Name::new(name);
                check_cancelled(&cancel)?;
                self.mutation
                    .delete_result_cascading(&name, etag.as_deref())
                    .await?;
                Ok(ArchiveResponse::Empty)
            }
            ArchiveRequest::ListResults {
                parent,
                filter,
                page_size,
                page_token,
            } => {
                if parent.is_empty() {
                    return Err(ArchiveError::invalid_argument("parent must not be empty"));
                }
                self.list_results(&parent, &filter, page_size, page_token, cancel)
                    .await
            }
        }
    }

    async fn list_results(
        &self,
        parent: &str,
        filter_text: &str,
        page_size: i64,
        page_token: Option<String>,
        cancel: watch::Receiver<bool>,
    ) -> ArchiveResult<ArchiveResponse> {
        let page_size = pagination::resolve_page_size(page_size)?;
        let program = ParentScopedFilter {
            parent_prefix: parent.to_string(),
            inner: filter::compile(filter_text)?,
        };

        let resume = match page_token {
            Some(token) => {
                let token = ContinuationToken::decode(&token)?;
                token.verify_filter(filter_text)?;
                Some(token)
            }
            None => None,
        };

        let binder = ExecutionBinder {
            storage: self.storage.clone(),
        };
        let page = pagination::list_page(
            self.storage.as_ref(),
            page_size,
            filter_text,
            &program,
            &binder,
            resume,
            cancel,
        )
        .await?;

        let mut results = Vec::with_capacity(page.results.len());
        for row in page.results {
            results.push(crate::encoding::decode::<ResultRecord>(&row.data)?);
        }

        Ok(ArchiveResponse::ListResults {
            results,
            next_page_token: page.next_page_token,
        })
    }
}

/// Mutation handlers check the cancellation signal once before
/// committing; a cancellation observed after that point is ignored
/// because the write has already happened.
fn check_cancelled(cancel: &watch::Receiver<bool>) -> ArchiveResult<()> {
    if *cancel.borrow() {
        return Err(ArchiveError::Cancelled);
    }
    Ok(())
}

/// Builds filter bindings for a Result row by fetching its child Records
/// and decoding each one whose `content_type` names a known execution
/// type. Bindings map variable names to decoded execution payloads; a
/// missing type is bound to `null`, never omitted, so `field.x == ""`
/// can't raise on an absent field.
struct ExecutionBinder<S: StorageAdapter + ?Sized> {
    storage: Arc<S>,
}

#[async_trait]
impl<S: StorageAdapter + ?Sized> RowBinder for ExecutionBinder<S> {
    async fn bind(&self, row: &Row) -> ArchiveResult<Bindings> {
        let mut bindings = Bindings::new();
        bindings.insert(
            ROW_NAME_BINDING,
            serde_json::Value::String(row.name.to_string()),
        );
        for (_, binding_name) in EXECUTION_TYPE_CONTENT_TYPES {
            bindings.insert(binding_name, serde_json::Value::Null);
        }

        for child in fetch_children(self.storage.as_ref(), &row.name).await? {
            let record: ExecutionRecord = match crate::encoding::decode(&child.data) {
                Ok(record) => record,
                Err(e) => {
                    warn!(name = %child.name, error = %e, "failed to decode child record");
                    return Err(e);
                }
            };
            if let Some((_, binding_name)) = EXECUTION_TYPE_CONTENT_TYPES
                .iter()
                .find(|(content_type, _)| *content_type == record.data.content_type)
            {
                let payload: serde_json::Value = serde_json::from_slice(&record.data.value)
                    .map_err(|e| {
                        ArchiveError::internal(format!(
                            "record {} has non-JSON execution payload: {e}",
                            child.name
                        ))
                    })?;
                bindings.insert(binding_name, payload);
            }
        }

        Ok(bindings)
    }
}

/// Fetches every row whose name is a strict `/records/` extension of
/// `result_name`, paging through the storage adapter's `scan` primitives
/// (no bounded-prefix query exists in the storage adapter contract).
async fn fetch_children<S: StorageAdapter + ?Sized>(
    storage: &S,
    result_name: &Name,
) -> ArchiveResult<Vec<Row>> {
    const BATCH: usize = 256;
    let lower = Name::new(format!("{result_name}/records/"));
    let mut out = Vec::new();
    let mut batch = storage.scan_inclusive(&lower, BATCH).await?;
    loop {
        let returned = batch.len();
        let mut exhausted_prefix = false;
        let mut last_name = None;
        for row in batch {
            if !row.name.as_str().starts_with(lower.as_str()) {
                exhausted_prefix = true;
                break;
            }
            last_name = Some(row.name.clone());
            out.push(row);
        }
        if exhausted_prefix || returned < BATCH {
            break;
        }
        let Some(cursor) = last_name else { break };
        batch = storage.scan(Some(&cursor), BATCH).await?;
    }
    Ok(out)
}

/// Internal helper used by a watcher-style client to attach a Record to
/// an existing Result (no RPC method surfaces this, but the
/// storage path is the same one `ListResults` reads from).
pub async fn attach_record<S: StorageAdapter + 'static>(
    service: &ArchiveService<S>,
    result_name: &Name,
    data: Data,
) -> ArchiveResult<ExecutionRecord> {
    service.mutation.create_record(result_name, data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Annotations;
    use crate::storage::memory::MemoryAdapter;

    fn service() -> ArchiveService<MemoryAdapter> {
        ArchiveService::new(Arc::new(MemoryAdapter::new()))
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let svc = service();
        let created = match svc
            .handle(
                ArchiveRequest::CreateResult {
                    parent: "namespace/default".to_string(),
                    annotations: Annotations::new(),
                },
                no_cancel(),
            )
            .await
        {
            ArchiveResponse::Result { result } => result,
            other => panic!("unexpected response: {other:?}"),
        };
        assert!(created
            .name
            .as_str()
            .starts_with("namespace/default/results/"));

        let fetched = match svc
            .handle(
                ArchiveRequest::GetResult {
                    name: created.name.to_string(),
                },
                no_cancel(),
            )
            .await
        {
            ArchiveResponse::Result { result } => result,
            other => panic!("unexpected response: {other:?}"),
        };
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_missing_returns_not_found_error() {
        let svc = service();
        let response = svc
            .handle(
                ArchiveRequest::GetResult {
                    name: "ns/default/results/missing".to_string(),
                },
                no_cancel(),
            )
            .await;
        match response {
            ArchiveResponse::Error { error } => assert_eq!(error.code, "not_found"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_with_empty_parent_is_invalid_argument() {
        let svc = service();
        let response = svc
            .handle(
                ArchiveRequest::CreateResult {
                    parent: String::new(),
                    annotations: Annotations::new(),
                },
                no_cancel(),
            )
            .await;
        match response {
            ArchiveResponse::Error { error } => assert_eq!(error.code, "invalid_argument"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_paginates_by_parent() {
        let svc = service();
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

        let first_page = match svc
            .handle(
                ArchiveRequest::ListResults {
                    parent: "ns/".to_string(),
                    filter: String::new(),
                    page_size: 2,
                    page_token: None,
                },
                no_cancel(),
            )
            .await
        {
            ArchiveResponse::ListResults {
                results,
                next_page_token,
            } => (results, next_page_token),
            other => panic!("unexpected response: {other:?}"),
        };
        assert_eq!(first_page.0.len(), 2);
        assert!(first_page.1.is_some());

        let second_page = match svc
            .handle(
                ArchiveRequest::ListResults {
                    parent: "ns/".to_string(),
                    filter: String::new(),
                    page_size: 2,
                    page_token: first_page.1,
                },
                no_cancel(),
            )
            .await
        {
            ArchiveResponse::ListResults {
                results,
                next_page_token,
            } => (results, next_page_token),
            other => panic!("unexpected response: {other:?}"),
        };
        assert_eq!(second_page.0.len(), 1);
        assert!(second_page.1.is_none());
    }

    #[tokio::test]
    async fn list_with_changed_filter_rejects_stale_token() {
        let svc = service();
        svc.handle(
            ArchiveRequest::CreateResult {
                parent: "ns/default".to_string(),
                annotations: Annotations::new(),
            },
            no_cancel(),
        )
        .await;

        let response = svc
            .handle(
                ArchiveRequest::ListResults {
                    parent: "ns/default".to_string(),
                    filter: "taskrun.status == \"Succeeded\"".to_string(),
                    page_size: 1,
                    page_token: Some(
                        ContinuationToken::new(Name::new("ns/default/results/zzz"), "old filter")
                            .encode(),
                    ),
                },
                no_cancel(),
            )
            .await;
        match response {
            ArchiveResponse::Error { error } => assert_eq!(error.code, "invalid_argument"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn attach_record_is_visible_to_list_filter() {
        let svc = service();
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

        attach_record(
            &svc,
            &created.name,
            Data {
                content_type: "application/vnd.archive.taskrun+json".to_string(),
                value: serde_json::to_vec(&serde_json::json!({"status": "Succeeded"})).unwrap(),
            },
        )
        .await
        .unwrap();

        let matched = match svc
            .handle(
                ArchiveRequest::ListResults {
                    parent: "ns/default".to_string(),
                    filter: "taskrun.status == \"Succeeded\"".to_string(),
                    page_size: 10,
                    page_token: None,
                },
                no_cancel(),
            )
            .await
        {
            ArchiveResponse::ListResults { results, .. } => results,
            other => panic!("unexpected response: {other:?}"),
        };
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, created.name);
    }

    #[tokio::test]
    async fn list_scopes_to_exact_parent_not_a_textual_prefix() {
        let svc = service();
        // "ns/ab" is a textual prefix-match trap for "ns/a": a naive
        // `starts_with` would wrongly pull these rows into a "ns/a" listing.
        for parent in ["ns/a", "ns/ab", "ns/ab"] {
            svc.handle(
                ArchiveRequest::CreateResult {
                    parent: parent.to_string(),
                    annotations: Annotations::new(),
                },
                no_cancel(),
            )
            .await;
        }

        let mut all = Vec::new();
        let mut token = None;
        loop {
            let (results, next) = match svc
                .handle(
                    ArchiveRequest::ListResults {
                        parent: "ns/a".to_string(),
                        filter: String::new(),
                        page_size: 1,
                        page_token: token.take(),
                    },
                    no_cancel(),
                )
                .await
            {
                ArchiveResponse::ListResults {
                    results,
                    next_page_token,
                } => (results, next_page_token),
                other => panic!("unexpected response: {other:?}"),
            };
            all.extend(results);
            match next {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        assert_eq!(all.len(), 1, "only the exact ns/a result should match");
        assert!(all[0].name.as_str().starts_with("ns/a/results/"));
    }
}
