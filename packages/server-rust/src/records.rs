//! In-memory JSON record store served as a worker collaborator.
//!
//! Records are JSON objects keyed by an auto-incremented positive id, which
//! is also written into the record's `id` field. A store can name a parent
//! relation (`/patient/{id}` listings) backed by a numeric field such as
//! `patientId`. Prescriptions add the `validate` and `send` member actions
//! on top of a plain store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use topicrpc_core::{status, DispatchTable, Request, Resource, Response};

/// Parent relation of a record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// Literal path segment, e.g. `"patient"`.
    pub relation: String,
    /// Record field holding the parent id, e.g. `"patientId"`.
    pub field: String,
}

impl ParentLink {
    /// Link whose field is `<relation>Id`.
    #[must_use]
    pub fn conventional(relation: &str) -> Self {
        Self {
            relation: relation.to_string(),
            field: format!("{relation}Id"),
        }
    }
}

/// Thread-safe store of JSON records for one resource type.
#[derive(Debug)]
pub struct RecordStore {
    /// Singular noun for error messages, e.g. `"Examination"`.
    noun: String,
    parent: Option<ParentLink>,
    /// Fields filled in on create when the body omits them.
    defaults: Map<String, Value>,
    records: DashMap<u32, Map<String, Value>>,
    next_id: AtomicU32,
}

impl RecordStore {
    #[must_use]
    pub fn new(noun: &str) -> Self {
        Self {
            noun: noun.to_string(),
            parent: None,
            defaults: Map::new(),
            records: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: ParentLink) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_default(mut self, field: &str, value: Value) -> Self {
        self.defaults.insert(field.to_string(), value);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn sorted(&self, keep: impl Fn(&Map<String, Value>) -> bool) -> Vec<Value> {
        let mut matching: Vec<(u32, Value)> = self
            .records
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| (*entry.key(), Value::Object(entry.value().clone())))
            .collect();
        matching.sort_by_key(|(id, _)| *id);
        matching.into_iter().map(|(_, record)| record).collect()
    }

    /// Applies `change` to record `id` and answers with the result. A
    /// rejected change leaves the record untouched.
    fn modify(
        &self,
        request: &Request,
        id: u32,
        change: impl FnOnce(&mut Map<String, Value>) -> Result<(), String>,
    ) -> Response {
        let Some(mut record) = self.records.get_mut(&id) else {
            return self.not_found(request);
        };
        let mut edited = record.value().clone();
        if let Err(message) = change(&mut edited) {
            return Response::error(request, status::BAD_REQUEST, &message);
        }
        *record = edited;
        Response::json(request, status::OK, record.value())
    }

    fn not_found(&self, request: &Request) -> Response {
        Response::error(
            request,
            status::NOT_FOUND,
            &format!("{} not found", self.noun),
        )
    }
}

/// Store for one of the standard services: patients stand alone,
/// examinations belong to a patient, samples, prescriptions and referrals
/// to an examination. Unknown names get a standalone store.
#[must_use]
pub fn standard_store(service: &str) -> RecordStore {
    match service {
        "patients" => RecordStore::new("Patient"),
        "prescriptions" => RecordStore::new("Prescription")
            .with_parent(ParentLink::conventional("examination"))
            .with_default(VALIDATED, Value::Bool(false))
            .with_default(SENT, Value::Bool(false)),
        "referrals" => {
            RecordStore::new("Referral").with_parent(ParentLink::conventional("examination"))
        }
        "examinations" => {
            RecordStore::new("Examination").with_parent(ParentLink::conventional("patient"))
        }
        "samples" => {
            RecordStore::new("Sample").with_parent(ParentLink::conventional("examination"))
        }
        other => RecordStore::new(other),
    }
}

/// Dispatch table a worker for `service` answers with.
#[must_use]
pub fn standard_table(service: &str) -> DispatchTable {
    let store = standard_store(service);
    if service == "prescriptions" {
        DispatchTable::for_resource(Arc::new(Prescriptions::new(store)))
    } else {
        DispatchTable::for_resource(Arc::new(store))
    }
}

/// Parses the request body as a JSON object.
fn object_body(request: &Request) -> Result<Map<String, Value>, String> {
    match serde_json::from_slice::<Value>(request.body()) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err("Invalid request body: expected a JSON object".to_string()),
        Err(e) => Err(format!("Invalid request body: {e}")),
    }
}

impl Resource for RecordStore {
    fn parent_relation(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.relation.as_str())
    }

    fn list(&self, request: &Request) -> Response {
        Response::json(request, status::OK, &self.sorted(|_| true))
    }

    fn get(&self, request: &Request, id: u32) -> Response {
        match self.records.get(&id) {
            Some(record) => Response::json(request, status::OK, record.value()),
            None => self.not_found(request),
        }
    }

    fn create(&self, request: &Request) -> Response {
        let mut fields = match object_body(request) {
            Ok(fields) => fields,
            Err(message) => return Response::error(request, status::BAD_REQUEST, &message),
        };
        for (key, value) in &self.defaults {
            fields.entry(key.clone()).or_insert_with(|| value.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        fields.insert("id".to_string(), Value::from(id));
        self.records.insert(id, fields.clone());
        Response::json(request, status::CREATED, &fields)
    }

    fn update(&self, request: &Request, id: u32) -> Response {
        let changes = match object_body(request) {
            Ok(fields) => fields,
            Err(message) => return Response::error(request, status::BAD_REQUEST, &message),
        };
        self.modify(request, id, |record| {
            merge(record, changes);
            Ok(())
        })
    }

    fn delete(&self, request: &Request, id: u32) -> Response {
        match self.records.remove(&id) {
            Some(_) => Response::reply(request, status::NO_CONTENT),
            None => self.not_found(request),
        }
    }

    fn list_by_parent(&self, request: &Request, parent_id: u32) -> Response {
        let Some(parent) = &self.parent else {
            return Response::error(request, status::NOT_FOUND, "Route not found");
        };
        let children = self.sorted(|record| {
            record.get(&parent.field).and_then(Value::as_u64) == Some(u64::from(parent_id))
        });
        Response::json(request, status::OK, &children)
    }
}

/// Copies `changes` over `record`, keeping the record's own id.
fn merge(record: &mut Map<String, Value>, changes: Map<String, Value>) {
    for (key, value) in changes {
        if key != "id" {
            record.insert(key, value);
        }
    }
}

const VALIDATED: &str = "validated";
const SENT: &str = "sent";

fn flag(record: &Map<String, Value>, field: &str) -> bool {
    record.get(field).and_then(Value::as_bool).unwrap_or(false)
}

/// Prescription records: a prescription must be validated before it is
/// sent, whether through `POST /{id}/send` or an update setting `sent`.
#[derive(Debug)]
pub struct Prescriptions {
    store: RecordStore,
}

impl Prescriptions {
    const ACTIONS: [&'static str; 2] = ["validate", "send"];

    #[must_use]
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    fn outcome(request: &Request, message: &str, response: Response) -> Response {
        if response.status_code() != status::OK {
            return response;
        }
        let prescription =
            serde_json::from_slice::<Value>(response.body()).unwrap_or(Value::Null);
        Response::json(
            request,
            status::OK,
            &serde_json::json!({ "message": message, "prescription": prescription }),
        )
    }
}

impl Resource for Prescriptions {
    fn parent_relation(&self) -> Option<&str> {
        self.store.parent_relation()
    }

    fn list(&self, request: &Request) -> Response {
        self.store.list(request)
    }

    fn get(&self, request: &Request, id: u32) -> Response {
        self.store.get(request, id)
    }

    fn create(&self, request: &Request) -> Response {
        self.store.create(request)
    }

    fn update(&self, request: &Request, id: u32) -> Response {
        let changes = match object_body(request) {
            Ok(fields) => fields,
            Err(message) => return Response::error(request, status::BAD_REQUEST, &message),
        };
        self.store.modify(request, id, |record| {
            merge(record, changes);
            if flag(record, SENT) && !flag(record, VALIDATED) {
                return Err("cannot mark prescription as sent before it is validated".into());
            }
            Ok(())
        })
    }

    fn delete(&self, request: &Request, id: u32) -> Response {
        self.store.delete(request, id)
    }

    fn list_by_parent(&self, request: &Request, parent_id: u32) -> Response {
        self.store.list_by_parent(request, parent_id)
    }

    fn actions(&self) -> &[&str] {
        &Self::ACTIONS
    }

    fn act(&self, request: &Request, id: u32, action: &str) -> Response {
        match action {
            "validate" => {
                let response = self.store.modify(request, id, |record| {
                    record.insert(VALIDATED.to_string(), Value::Bool(true));
                    Ok(())
                });
                Self::outcome(request, "Prescription validated successfully", response)
            }
            "send" => {
                let response = self.store.modify(request, id, |record| {
                    if !flag(record, VALIDATED) {
                        return Err("prescription must be validated before sending".into());
                    }
                    record.insert(SENT.to_string(), Value::Bool(true));
                    Ok(())
                });
                Self::outcome(request, "Prescription sent to pharmacy", response)
            }
            _ => Response::error(request, status::NOT_FOUND, "Route not found"),
        }
    }
}
