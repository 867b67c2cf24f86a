use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::StoreConfig;

pub type RecordFields = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Transport(String),
    #[error("store returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected store payload: {0}")]
    Payload(String),
}

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub fields: RecordFields,
}

/// Keyed record persistence. Every call is fallible and must be treated as
/// non-fatal to the user-facing turn.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, table: &str, fields: RecordFields) -> Result<StoredRecord, StoreError>;
    async fn update(&self, table: &str, id: &str, fields: RecordFields) -> Result<(), StoreError>;
    async fn delete(&self, table: &str, id: &str) -> Result<(), StoreError>;
    async fn find_one_by_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<StoredRecord>, StoreError>;
}

/// Airtable REST implementation (the system of record in production).
pub struct AirtableStore {
    client: reqwest::Client,
    base_url: String,
    base_id: String,
    api_key: String,
}

#[derive(serde::Deserialize)]
struct AirtableRecord {
    id: String,
    #[serde(default)]
    fields: RecordFields,
}

#[derive(serde::Deserialize)]
struct AirtableList {
    #[serde(default)]
    records: Vec<AirtableRecord>,
}

impl AirtableStore {
    pub fn new(config: &StoreConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            base_id: config.base_id.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.base_id, urlencode(table))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[async_trait]
impl RecordStore for AirtableStore {
    async fn create(&self, table: &str, fields: RecordFields) -> Result<StoredRecord, StoreError> {
        let response = self
            .client
            .post(self.table_url(table))
            .bearer_auth(&self.api_key)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let record: AirtableRecord = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Payload(e.to_string()))?;
        Ok(StoredRecord {
            id: record.id,
            fields: record.fields,
        })
    }

    async fn update(&self, table: &str, id: &str, fields: RecordFields) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(format!("{}/{}", self.table_url(table), id))
            .bearer_auth(&self.api_key)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(format!("{}/{}", self.table_url(table), id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn find_one_by_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        // filterByFormula string literals escape single quotes by doubling
        let formula = format!("{{{}}}='{}'", field, value.replace('\'', "''"));
        let response = self
            .client
            .get(self.table_url(table))
            .bearer_auth(&self.api_key)
            .query(&[("filterByFormula", formula.as_str()), ("maxRecords", "1")])
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let list: AirtableList = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Payload(e.to_string()))?;
        Ok(list.records.into_iter().next().map(|r| StoredRecord {
            id: r.id,
            fields: r.fields,
        }))
    }
}

/// In-process store used by `--demo` and the test suite. Not a production
/// backend: it does not survive restarts.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<StoredRecord>>>,
    next_id: AtomicU64,
    fail_all: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, to exercise degradation paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_all.store(unavailable, Ordering::SeqCst);
    }

    pub fn records(&self, table: &str) -> Vec<StoredRecord> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn gate(&self) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, table: &str, fields: RecordFields) -> Result<StoredRecord, StoreError> {
        self.gate()?;
        let id = format!("rec{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = StoredRecord {
            id: id.clone(),
            fields,
        };
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, table: &str, id: &str, fields: RecordFields) -> Result<(), StoreError> {
        self.gate()?;
        let mut tables = self.tables.lock().unwrap();
        let records = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::Payload(format!("no such table {table}")))?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::Payload(format!("no such record {id}")))?;
        for (key, value) in fields {
            record.fields.insert(key, value);
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), StoreError> {
        self.gate()?;
        if let Some(records) = self.tables.lock().unwrap().get_mut(table) {
            records.retain(|r| r.id != id);
        }
        Ok(())
    }

    async fn find_one_by_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        self.gate()?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| r.fields.get(field).and_then(Value::as_str) == Some(value))
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> RecordFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let created = store
            .create("Sessions", fields(&[("Sender", "+391234"), ("Step", "payee")]))
            .await
            .unwrap();

        let found = store
            .find_one_by_field("Sessions", "Sender", "+391234")
            .await
            .unwrap()
            .expect("record should be found");
        assert_eq!(found.id, created.id);

        store
            .update("Sessions", &created.id, fields(&[("Step", "amount")]))
            .await
            .unwrap();
        let found = store
            .find_one_by_field("Sessions", "Sender", "+391234")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.fields.get("Step").and_then(Value::as_str), Some("amount"));

        store.delete("Sessions", &created.id).await.unwrap();
        assert!(store
            .find_one_by_field("Sessions", "Sender", "+391234")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_memory_store_unavailability() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.create("Sessions", RecordFields::new()).await.is_err());
        assert!(store
            .find_one_by_field("Sessions", "Sender", "x")
            .await
            .is_err());
    }
}
