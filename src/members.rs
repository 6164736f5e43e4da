use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{self, join_url, Resource, Transport};
use crate::crawler::Tally;
use crate::error::{Outcome, TransportError};
use crate::sink::{write_json, OutputSink};

/// Fetch the MP and club lists of a term and save them as
/// `term{T}/members.json` and `term{T}/clubs.json`.
pub async fn save_roster<A: Transport>(
    api: &A,
    sink: &OutputSink,
    term: u32,
    cancel: &CancellationToken,
) -> Tally {
    let mut tally = Tally::default();
    let lists = [
        (Resource::Members { term }, "MP", "members.json"),
        (Resource::Clubs { term }, "clubs", "clubs.json"),
    ];

    for (resource, segment, file) in lists {
        let outcome = save_list(api, sink, term, &resource, segment, file, cancel).await;
        tally.record(&outcome);
    }
    tally
}

async fn save_list<A: Transport>(
    api: &A,
    sink: &OutputSink,
    term: u32,
    resource: &Resource,
    segment: &str,
    file: &str,
    cancel: &CancellationToken,
) -> Outcome {
    if cancel.is_cancelled() {
        return Outcome::cancelled();
    }

    let entries: Vec<Value> = match api::fetch_json(api, resource).await {
        Ok(entries) => entries,
        Err(e) => return failed(term, file, &e),
    };
    if cancel.is_cancelled() {
        return Outcome::cancelled();
    }

    let base = format!("term{}/{}", term, segment);
    let entries = with_links(entries, &join_url(api.base_url(), &base));

    let path = sink.term_dir(term).join(file);
    match write_json(&path, &entries).await {
        Ok(()) => {
            info!("Saved {}: {}", segment, path.display());
            Outcome::Done
        }
        Err(e) => {
            warn!(term, "Error saving {}: {}", file, e);
            Outcome::Failed(e.to_string())
        }
    }
}

fn failed(term: u32, file: &str, e: &TransportError) -> Outcome {
    warn!(term, "Error retrieving data for {}: {}", file, e);
    Outcome::Failed(e.to_string())
}

/// Add `link = {base}/{id}` to every object entry that has an `id`.
fn with_links(mut entries: Vec<Value>, base: &str) -> Vec<Value> {
    for entry in &mut entries {
        let Some(obj) = entry.as_object_mut() else { continue };
        let id = match obj.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        obj.insert("link".to_string(), Value::String(format!("{}/{}", base, id)));
    }
    entries
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    const BASE: &str = "https://mock.test/sejm";

    struct RosterApi {
        clubs_fail: bool,
        calls: AtomicUsize,
    }

    impl Transport for RosterApi {
        fn base_url(&self) -> &str {
            BASE
        }

        async fn fetch(&self, resource: &Resource) -> Result<String, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match resource {
                Resource::Members { .. } => Ok(json!([
                    { "id": 1, "firstLastName": "Anna Nowak", "club": "KO" },
                    { "id": 2, "firstLastName": "Jan Kowalski", "club": "PiS" }
                ])
                .to_string()),
                Resource::Clubs { .. } if self.clubs_fail => {
                    Err(TransportError::Status { url: self.url(resource), status: 503 })
                }
                Resource::Clubs { .. } => Ok(json!([{ "id": "KO", "name": "Koalicja Obywatelska" }]).to_string()),
                _ => Ok("[]".to_string()),
            }
        }
    }

    fn read(path: std::path::PathBuf) -> Vec<Value> {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn saves_members_and_clubs_with_links() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(dir.path());
        let api = RosterApi { clubs_fail: false, calls: AtomicUsize::new(0) };

        let tally = save_roster(&api, &sink, 10, &CancellationToken::new()).await;
        assert_eq!(tally.done, 2);

        let members = read(dir.path().join("term10/members.json"));
        assert_eq!(members[1]["link"], "https://mock.test/sejm/term10/MP/2");
        assert_eq!(members[1]["club"], "PiS");

        let clubs = read(dir.path().join("term10/clubs.json"));
        assert_eq!(clubs[0]["link"], "https://mock.test/sejm/term10/clubs/KO");
    }

    #[tokio::test]
    async fn clubs_failure_keeps_members() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(dir.path());
        let api = RosterApi { clubs_fail: true, calls: AtomicUsize::new(0) };

        let tally = save_roster(&api, &sink, 10, &CancellationToken::new()).await;
        assert_eq!((tally.done, tally.failed), (1, 1));
        assert!(dir.path().join("term10/members.json").exists());
        assert!(!dir.path().join("term10/clubs.json").exists());
    }

    #[tokio::test]
    async fn cancelled_before_start_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(dir.path());
        let api = RosterApi { clubs_fail: false, calls: AtomicUsize::new(0) };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tally = save_roster(&api, &sink, 10, &cancel).await;
        assert_eq!(tally.cancelled, 2);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn entries_without_id_get_no_link() {
        let out = with_links(vec![json!({ "name": "x" }), json!("scalar")], "b");
        assert!(out[0].get("link").is_none());
        assert_eq!(out[1], json!("scalar"));
    }
}
