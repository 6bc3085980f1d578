//! Bundled routes over the in-memory store.
//!
//! - `GET /status` reports server state.
//! - `GET /odb/<path>` reads a value; `POST /odb/<path>` writes the JSON body.
//! - `POST /?mjsonrpc` serves `echo`, `db_get_values`, and `db_paste`.

use serde_json::{Value, json};

use super::rpc::{RpcError, RpcRequest, RpcResponse};
use super::store::MemoryStore;
use super::{Content, ContentBuilder, ContentError, Outcome};
use crate::dispatch::{DatabaseAccess, DecodedRequest, RequestKind};

const ODB_PREFIX: &str = "/odb";
const STATUS_PATH: &str = "/status";

/// Status codes reported per path by the database methods.
const DB_SUCCESS: i64 = 1;
const DB_NO_KEY: i64 = 312;

/// Serves the bundled routes against a [`MemoryStore`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreContentBuilder;

impl StoreContentBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn get(
        request: &DecodedRequest,
        database: &mut DatabaseAccess<'_, MemoryStore>,
    ) -> Result<Outcome, ContentError> {
        if request.path() == STATUS_PATH {
            let entries = database.with(|store| MemoryStore::len(store))?;
            return Ok(Outcome::Content(Content::json(&json!({
                "status": "running",
                "entries": entries,
                "user": request.username(),
            }))));
        }
        let Some(path) = odb_path(request.path()) else {
            return Ok(Outcome::NotHandled);
        };
        let value = database.with(|store| store.get(path).cloned())?;
        value
            .map(|found| Outcome::Content(Content::json(&found)))
            .ok_or_else(|| ContentError::not_found(format!("no such key: {path}")))
    }

    fn post(
        request: &DecodedRequest,
        database: &mut DatabaseAccess<'_, MemoryStore>,
    ) -> Result<Outcome, ContentError> {
        let Some(path) = odb_path(request.path()) else {
            return Ok(Outcome::NotHandled);
        };
        let value: Value = serde_json::from_slice(request.body())
            .map_err(|error| ContentError::bad_request(format!("invalid JSON body: {error}")))?;
        database.with(|store| store.set(path, value))?;
        Ok(Outcome::Content(Content::json(&json!({ "status": DB_SUCCESS }))))
    }

    fn json_rpc(
        request: &DecodedRequest,
        database: &mut DatabaseAccess<'_, MemoryStore>,
    ) -> Result<Outcome, ContentError> {
        let reply = match RpcRequest::parse(request.body()) {
            Ok(call) => {
                let outcome = Self::call(&call, database)?;
                RpcResponse {
                    outcome,
                    id: call.id,
                }
            }
            Err(reply) => reply,
        };
        Ok(Outcome::Content(Content::json(&reply.to_value())))
    }

    fn call(
        call: &RpcRequest,
        database: &mut DatabaseAccess<'_, MemoryStore>,
    ) -> Result<Result<Value, RpcError>, ContentError> {
        match call.method.as_str() {
            "echo" => Ok(Ok(call.raw.clone())),
            "db_get_values" => {
                let paths = match call.string_array("paths") {
                    Ok(paths) => paths,
                    Err(error) => return Ok(Err(error)),
                };
                let values = database.with(|store| {
                    paths
                        .iter()
                        .map(|path| store.get(path).cloned())
                        .collect::<Vec<_>>()
                })?;
                let status: Vec<i64> = values
                    .iter()
                    .map(|value| if value.is_some() { DB_SUCCESS } else { DB_NO_KEY })
                    .collect();
                let data: Vec<Value> = values
                    .into_iter()
                    .map(|value| value.unwrap_or(Value::Null))
                    .collect();
                Ok(Ok(json!({ "data": data, "status": status })))
            }
            "db_paste" => {
                let (paths, values) = match (call.string_array("paths"), call.array("values")) {
                    (Ok(paths), Ok(values)) => (paths, values),
                    (Err(error), _) | (_, Err(error)) => return Ok(Err(error)),
                };
                if paths.len() != values.len() {
                    return Ok(Err(RpcError::invalid_params(
                        "paths and values should have the same length",
                    )));
                }
                let status = database.with(|store| {
                    paths
                        .iter()
                        .zip(values)
                        .map(|(path, value)| {
                            store.set(path, value.clone());
                            DB_SUCCESS
                        })
                        .collect::<Vec<_>>()
                })?;
                Ok(Ok(json!({ "status": status })))
            }
            other => Ok(Err(RpcError::method_not_found(other))),
        }
    }
}

impl ContentBuilder<MemoryStore> for StoreContentBuilder {
    fn build(
        &self,
        request: &DecodedRequest,
        kind: RequestKind,
        database: &mut DatabaseAccess<'_, MemoryStore>,
    ) -> Result<Outcome, ContentError> {
        match kind {
            RequestKind::Get => Self::get(request, database),
            RequestKind::Post => Self::post(request, database),
            RequestKind::JsonRpc => Self::json_rpc(request, database),
            RequestKind::Unroutable => Ok(Outcome::NotHandled),
        }
    }
}

/// Store path under the `/odb` prefix, if the request targets it.
fn odb_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(ODB_PREFIX)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SharedDatabase;
    use crate::trace::RequestTrace;
    use http::{Method, StatusCode};
    use rstest::{fixture, rstest};

    #[fixture]
    fn database() -> SharedDatabase<MemoryStore> {
        let mut store = MemoryStore::new();
        store.set("/Run/State", json!(3));
        SharedDatabase::new(store)
    }

    fn serve(
        database: &SharedDatabase<MemoryStore>,
        method: Method,
        target: &str,
        body: &str,
    ) -> (Result<Outcome, ContentError>, usize) {
        let request = DecodedRequest::decode(method, target, &[], body.as_bytes().to_vec());
        let mut trace = RequestTrace::new("-", target, "");
        let mut access = DatabaseAccess::new(database, &mut trace);
        let outcome = StoreContentBuilder::new().build(&request, request.kind(), &mut access);
        (outcome, access.acquisitions())
    }

    fn json_body(outcome: Result<Outcome, ContentError>) -> Value {
        match outcome {
            Ok(Outcome::Content(content)) => {
                serde_json::from_slice(&content.body).expect("JSON response body")
            }
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[rstest]
    fn status_takes_the_lock_once(database: SharedDatabase<MemoryStore>) {
        let (outcome, acquisitions) = serve(&database, Method::GET, "/status", "");
        assert_eq!(acquisitions, 1);
        assert_eq!(json_body(outcome)["entries"], json!(1));
    }

    #[rstest]
    fn reads_and_writes_odb_paths(database: SharedDatabase<MemoryStore>) {
        let (written, _) = serve(&database, Method::POST, "/odb/Run/Number", "42");
        assert_eq!(json_body(written), json!({"status": 1}));
        let (read, _) = serve(&database, Method::GET, "/odb/Run/Number", "");
        assert_eq!(json_body(read), json!(42));
    }

    #[rstest]
    fn missing_keys_are_not_found(database: SharedDatabase<MemoryStore>) {
        let (outcome, _) = serve(&database, Method::GET, "/odb/Nope", "");
        let error = outcome.expect_err("missing key");
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }

    #[rstest]
    fn unknown_paths_are_not_handled(database: SharedDatabase<MemoryStore>) {
        let (outcome, acquisitions) = serve(&database, Method::GET, "/elsewhere", "");
        assert_eq!(outcome, Ok(Outcome::NotHandled));
        assert_eq!(acquisitions, 0);
    }

    #[rstest]
    fn rpc_get_values_reports_per_path_status(database: SharedDatabase<MemoryStore>) {
        let body = r#"{"jsonrpc":"2.0","method":"db_get_values","params":{"paths":["/Run/State","/Run/Gone"]},"id":1}"#;
        let (outcome, _) = serve(&database, Method::POST, "/?mjsonrpc", body);
        assert_eq!(
            json_body(outcome),
            json!({
                "jsonrpc": "2.0",
                "result": {"data": [3, null], "status": [1, 312]},
                "id": 1
            })
        );
    }

    #[rstest]
    fn rpc_paste_writes_every_path(database: SharedDatabase<MemoryStore>) {
        let body = r#"{"jsonrpc":"2.0","method":"db_paste","params":{"paths":["/a","/b"],"values":[1,"two"]},"id":"x"}"#;
        let (outcome, acquisitions) = serve(&database, Method::POST, "/?mjsonrpc", body);
        assert_eq!(json_body(outcome)["result"], json!({"status": [1, 1]}));
        assert_eq!(acquisitions, 1);
        let stored = database
            .with_database(|store| store.get("/b").cloned())
            .expect("lock");
        assert_eq!(stored, Some(json!("two")));
    }

    #[rstest]
    fn rpc_paste_rejects_mismatched_lengths(database: SharedDatabase<MemoryStore>) {
        let body = r#"{"jsonrpc":"2.0","method":"db_paste","params":{"paths":["/a"],"values":[]},"id":2}"#;
        let (outcome, acquisitions) = serve(&database, Method::POST, "/?mjsonrpc", body);
        assert_eq!(json_body(outcome)["error"]["code"], json!(-32602));
        assert_eq!(acquisitions, 0);
    }

    #[rstest]
    fn rpc_unknown_method(database: SharedDatabase<MemoryStore>) {
        let body = r#"{"jsonrpc":"2.0","method":"launch","params":{},"id":3}"#;
        let (outcome, _) = serve(&database, Method::POST, "/?mjsonrpc", body);
        let reply = json_body(outcome);
        assert_eq!(reply["error"]["code"], json!(-32601));
        assert_eq!(reply["id"], json!(3));
    }

    #[rstest]
    fn rpc_echo_returns_the_request(database: SharedDatabase<MemoryStore>) {
        let body = r#"{"jsonrpc":"2.0","method":"echo","params":[1],"id":4}"#;
        let (outcome, _) = serve(&database, Method::POST, "/?mjsonrpc", body);
        assert_eq!(
            json_body(outcome)["result"],
            json!({"jsonrpc": "2.0", "method": "echo", "params": [1], "id": 4})
        );
    }
}
