//! In-process store, optionally backed by a directory of YAML files.
//!
//! Layout of a directory-backed store:
//!
//! ```text
//! <root>/catalogs.yaml
//! <root>/<source>/records/<identifier>.yaml
//! <root>/<source>/couplings.yaml
//! <root>/<source>/state.yaml
//! ```
//!
//! Files are only written on commit, each one to a temporary file first and
//! then renamed over the target.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Storage, TransactionToken};
use crate::error::{HarvestError, Result};
use crate::model::{Catalog, CouplingEntity, RecordEntity};
use crate::settings::DEFAULT_BULK_SIZE;

const RECORDS_DIR: &str = "records";
const COUPLINGS_FILE: &str = "couplings.yaml";
const STATE_FILE: &str = "state.yaml";
const CATALOGS_FILE: &str = "catalogs.yaml";

type Key = (String, String);

/// A committed record and the transaction that last touched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredRecord {
    touched_at: DateTime<Utc>,
    entity: RecordEntity,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SourceState {
    source: String,
    last_successful_run: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum Staged {
    Record(Box<RecordEntity>),
    Coupling(Box<CouplingEntity>),
}

#[derive(Debug)]
struct OpenTransaction {
    token: TransactionToken,
    buffer: Vec<Staged>,
    records: HashMap<Key, RecordEntity>,
    couplings: HashMap<Key, CouplingEntity>,
    prune_sources: HashSet<String>,
    runs: HashMap<String, DateTime<Utc>>,
}

impl OpenTransaction {
    fn new(token: TransactionToken) -> Self {
        Self {
            token,
            buffer: Vec::new(),
            records: HashMap::new(),
            couplings: HashMap::new(),
            prune_sources: HashSet::new(),
            runs: HashMap::new(),
        }
    }

    fn flush(&mut self) -> usize {
        let flushed = self.buffer.len();
        for staged in self.buffer.drain(..) {
            match staged {
                Staged::Record(entity) => {
                    let key = (entity.source.clone(), entity.identifier.clone());
                    self.records.insert(key, *entity);
                }
                Staged::Coupling(coupling) => {
                    let key = (coupling.source.clone(), coupling.id());
                    self.couplings.insert(key, *coupling);
                }
            }
        }
        flushed
    }
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<Key, StoredRecord>,
    couplings: BTreeMap<Key, CouplingEntity>,
    runs: HashMap<String, DateTime<Utc>>,
    catalogs: HashMap<String, Catalog>,
    transaction: Option<OpenTransaction>,
}

impl State {
    fn transaction(&mut self) -> Result<&mut OpenTransaction> {
        self.transaction
            .as_mut()
            .ok_or_else(|| HarvestError::Storage("no open transaction".to_string()))
    }

    fn checked_transaction(&mut self, token: &TransactionToken) -> Result<&mut OpenTransaction> {
        let tx = self.transaction()?;
        if tx.token.id != token.id {
            return Err(HarvestError::Storage(format!(
                "transaction {} is not open",
                token.id
            )));
        }
        Ok(tx)
    }

    /// Committed keys of `source` not staged by the open transaction.
    fn untouched(&self, source: &str) -> Result<(usize, Vec<Key>)> {
        let tx = self
            .transaction
            .as_ref()
            .ok_or_else(|| HarvestError::Storage("no open transaction".to_string()))?;
        let known: Vec<&Key> = self.records.keys().filter(|(s, _)| s == source).collect();
        let untouched = known
            .iter()
            .copied()
            .filter(|key| !tx.records.contains_key(*key))
            .cloned()
            .collect();
        Ok((known.len(), untouched))
    }

    /// Records of `source` as seen from inside the open transaction.
    fn view(&self, source: &str) -> Vec<RecordEntity> {
        let mut view: BTreeMap<&str, &RecordEntity> = self
            .records
            .iter()
            .filter(|((s, _), _)| s == source)
            .map(|((_, id), stored)| (id.as_str(), &stored.entity))
            .collect();
        if let Some(tx) = &self.transaction {
            for ((s, id), entity) in &tx.records {
                if s == source {
                    view.insert(id.as_str(), entity);
                }
            }
        }
        view.into_values().cloned().collect()
    }

    fn couplings_of(&self, source: &str) -> Vec<CouplingEntity> {
        self.couplings
            .iter()
            .filter(|((s, _), _)| s == source)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Move a finished transaction into the committed state.
    fn apply(&mut self, mut tx: OpenTransaction) -> PersistPlan {
        tx.flush();
        let timestamp = tx.token.timestamp;
        let mut plan = PersistPlan::default();
        let mut coupling_sources = BTreeSet::new();

        for source in &tx.prune_sources {
            let stale: Vec<Key> = self
                .records
                .keys()
                .filter(|key| &key.0 == source && !tx.records.contains_key(*key))
                .cloned()
                .collect();
            for key in stale {
                self.records.remove(&key);
                plan.removals.push(key);
            }
            // A full run recomputes every coupling of its source.
            self.couplings.retain(|(s, _), _| s != source);
            coupling_sources.insert(source.clone());
        }

        for (key, entity) in tx.records {
            let stored = StoredRecord {
                touched_at: timestamp,
                entity,
            };
            plan.upserts.push(stored.clone());
            self.records.insert(key, stored);
        }

        for (key, coupling) in tx.couplings {
            coupling_sources.insert(key.0.clone());
            self.couplings.insert(key, coupling);
        }
        plan.couplings = coupling_sources
            .into_iter()
            .map(|source| {
                let couplings = self.couplings_of(&source);
                (source, couplings)
            })
            .collect();

        for (source, at) in tx.runs {
            self.runs.insert(source.clone(), at);
            plan.runs.push((source, at));
        }

        plan
    }
}

/// File writes resulting from one commit.
#[derive(Debug, Default)]
struct PersistPlan {
    upserts: Vec<StoredRecord>,
    removals: Vec<Key>,
    couplings: Vec<(String, Vec<CouplingEntity>)>,
    runs: Vec<(String, DateTime<Utc>)>,
}

impl PersistPlan {
    async fn write(self, root: &Path) -> Result<()> {
        for stored in &self.upserts {
            let path = record_path(root, &stored.entity.source, &stored.entity.identifier);
            write_atomic(&path, &serde_yaml_ng::to_string(stored)?).await?;
        }
        for (source, identifier) in &self.removals {
            match tokio::fs::remove_file(record_path(root, source, identifier)).await {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        for (source, couplings) in &self.couplings {
            let path = root.join(file_stem(source)).join(COUPLINGS_FILE);
            write_atomic(&path, &serde_yaml_ng::to_string(couplings)?).await?;
        }
        for (source, at) in &self.runs {
            let state = SourceState {
                source: source.clone(),
                last_successful_run: Some(*at),
            };
            let path = root.join(file_stem(source)).join(STATE_FILE);
            write_atomic(&path, &serde_yaml_ng::to_string(&state)?).await?;
        }
        Ok(())
    }
}

/// Encode an identifier as a file name, keeping it reversible and unique.
fn file_stem(identifier: &str) -> String {
    let mut stem = String::with_capacity(identifier.len());
    for byte in identifier.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

fn record_path(root: &Path, source: &str, identifier: &str) -> PathBuf {
    root.join(file_stem(source))
        .join(RECORDS_DIR)
        .join(format!("{}.yaml", file_stem(identifier)))
}

pub(crate) async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| HarvestError::Storage(format!("invalid path {}", path.display())))?;
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.tmp"));
    tokio::fs::write(&temp, content).await?;

    #[cfg(target_os = "windows")]
    if tokio::fs::metadata(path).await.is_ok() {
        tokio::fs::remove_file(path).await?;
    }

    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// In-process [`Storage`] implementation.
#[derive(Debug)]
pub struct LocalStore {
    state: Mutex<State>,
    root: Option<PathBuf>,
    bulk_size: usize,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// An empty, memory-only store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            root: None,
            bulk_size: DEFAULT_BULK_SIZE,
        }
    }

    /// Open (or create) a directory-backed store and load its contents.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let mut state = State::default();

        if let Some(content) = read_optional(&root.join(CATALOGS_FILE)).await? {
            let catalogs: Vec<Catalog> = serde_yaml_ng::from_str(&content)?;
            state.catalogs = catalogs.into_iter().map(|c| (c.id.clone(), c)).collect();
        }

        let mut sources = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = sources.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            load_source_dir(&entry.path(), &mut state).await?;
        }

        tracing::debug!(
            root = %root.display(),
            records = state.records.len(),
            couplings = state.couplings.len(),
            "Opened local store"
        );

        Ok(Self {
            state: Mutex::new(state),
            root: Some(root),
            bulk_size: DEFAULT_BULK_SIZE,
        })
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size.max(1);
        self
    }

    /// Register a catalogue (memory only; directory stores read
    /// `catalogs.yaml`).
    pub fn with_catalog(self, catalog: Catalog) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.catalogs.insert(catalog.id.clone(), catalog);
        }
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| HarvestError::Storage("store lock poisoned".to_string()))
    }

    fn stage(&self, staged: Staged) -> Result<()> {
        let mut state = self.lock()?;
        let tx = state.transaction()?;
        tx.buffer.push(staged);
        if tx.buffer.len() >= self.bulk_size {
            let flushed = tx.flush();
            tracing::trace!(flushed, "Bulk buffer flushed");
        }
        Ok(())
    }
}

async fn load_source_dir(dir: &Path, state: &mut State) -> Result<()> {
    match tokio::fs::read_dir(dir.join(RECORDS_DIR)).await {
        Ok(mut files) => {
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || !name.ends_with(".yaml") {
                    continue;
                }
                let content = tokio::fs::read_to_string(file.path()).await?;
                let stored: StoredRecord = serde_yaml_ng::from_str(&content)?;
                let key = (stored.entity.source.clone(), stored.entity.identifier.clone());
                state.records.insert(key, stored);
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(content) = read_optional(&dir.join(COUPLINGS_FILE)).await? {
        let couplings: Vec<CouplingEntity> = serde_yaml_ng::from_str(&content)?;
        for coupling in couplings {
            state
                .couplings
                .insert((coupling.source.clone(), coupling.id()), coupling);
        }
    }

    if let Some(content) = read_optional(&dir.join(STATE_FILE)).await? {
        let source_state: SourceState = serde_yaml_ng::from_str(&content)?;
        if let Some(at) = source_state.last_successful_run {
            state.runs.insert(source_state.source, at);
        }
    }
    Ok(())
}

#[async_trait]
impl Storage for LocalStore {
    async fn begin_transaction(&self) -> Result<TransactionToken> {
        let mut state = self.lock()?;
        if let Some(tx) = &state.transaction {
            return Err(HarvestError::Storage(format!(
                "transaction {} is already open",
                tx.token.id
            )));
        }
        let token = TransactionToken::new(Utc::now());
        state.transaction = Some(OpenTransaction::new(token));
        tracing::debug!(transaction = %token.id, "Transaction opened");
        Ok(token)
    }

    async fn add_entity_to_bulk(&self, entity: RecordEntity) -> Result<()> {
        self.stage(Staged::Record(Box::new(entity)))
    }

    async fn add_coupling_to_bulk(&self, coupling: CouplingEntity) -> Result<()> {
        self.stage(Staged::Coupling(Box::new(coupling)))
    }

    async fn send_bulk_data(&self) -> Result<usize> {
        let mut state = self.lock()?;
        Ok(state.transaction()?.flush())
    }

    async fn delete_non_fetched_datasets(
        &self,
        source: &str,
        token: &TransactionToken,
    ) -> Result<u64> {
        let mut state = self.lock()?;
        state.checked_transaction(token)?.flush();
        let (_, untouched) = state.untouched(source)?;
        state
            .checked_transaction(token)?
            .prune_sources
            .insert(source.to_string());
        Ok(untouched.len() as u64)
    }

    async fn non_fetched_percentage(
        &self,
        source: &str,
        token: &TransactionToken,
    ) -> Result<f64> {
        let mut state = self.lock()?;
        state.checked_transaction(token)?.flush();
        let (known, untouched) = state.untouched(source)?;
        if known == 0 {
            return Ok(0.0);
        }
        Ok(untouched.len() as f64 / known as f64 * 100.0)
    }

    async fn commit_transaction(&self) -> Result<()> {
        let plan = {
            let mut state = self.lock()?;
            let tx = state
                .transaction
                .take()
                .ok_or_else(|| HarvestError::Storage("no open transaction".to_string()))?;
            tracing::debug!(transaction = %tx.token.id, "Committing transaction");
            state.apply(tx)
        };

        if let Some(root) = &self.root {
            plan.write(root).await?;
        }
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut state = self.lock()?;
        match state.transaction.take() {
            Some(tx) => {
                tracing::debug!(transaction = %tx.token.id, "Transaction rolled back");
                Ok(())
            }
            None => Err(HarvestError::Storage("no open transaction".to_string())),
        }
    }

    async fn get_catalog(&self, id: &str) -> Result<Option<Catalog>> {
        Ok(self.lock()?.catalogs.get(id).cloned())
    }

    async fn get_dataset_identifiers(&self, source: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .records
            .keys()
            .filter(|(s, _)| s == source)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn get_datasets(&self, source: &str) -> Result<Vec<RecordEntity>> {
        let state = self.lock()?;
        Ok(state
            .view(source)
            .into_iter()
            .filter(|e| !e.dataset.is_service())
            .collect())
    }

    async fn get_services(&self, source: &str) -> Result<Vec<RecordEntity>> {
        let state = self.lock()?;
        Ok(state
            .view(source)
            .into_iter()
            .filter(|e| e.dataset.is_service())
            .collect())
    }

    async fn get_couplings(&self, source: &str) -> Result<Vec<CouplingEntity>> {
        Ok(self.lock()?.couplings_of(source))
    }

    async fn last_successful_run(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lock()?.runs.get(source).copied())
    }

    async fn mark_successful_run(&self, source: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        state.transaction()?.runs.insert(source.to_string(), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Distribution, MappedDataset, RecordKind, ServiceType};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn entity(source: &str, id: &str) -> RecordEntity {
        RecordEntity {
            identifier: id.to_string(),
            source: source.to_string(),
            collection_id: None,
            dataset: MappedDataset::new(id, Utc::now()),
            original_document: format!("<record id=\"{id}\"/>"),
        }
    }

    fn service(source: &str, id: &str) -> RecordEntity {
        let mut e = entity(source, id);
        e.dataset.kind = RecordKind::Service;
        e
    }

    async fn commit_all(store: &LocalStore, entities: Vec<RecordEntity>) {
        store.begin_transaction().await.unwrap();
        for e in entities {
            store.add_entity_to_bulk(e).await.unwrap();
        }
        store.commit_transaction().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_never_duplicates() {
        let store = LocalStore::new();
        commit_all(&store, vec![entity("geo", "a"), entity("geo", "b")]).await;
        commit_all(&store, vec![entity("geo", "a")]).await;

        assert_eq!(store.get_dataset_identifiers("geo").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_entities() {
        let store = LocalStore::new();
        store.begin_transaction().await.unwrap();
        store.add_entity_to_bulk(entity("geo", "a")).await.unwrap();
        store.send_bulk_data().await.unwrap();
        store
            .mark_successful_run("geo", Utc::now())
            .await
            .unwrap();
        store.rollback_transaction().await.unwrap();

        assert!(store.get_dataset_identifiers("geo").await.unwrap().is_empty());
        assert!(store.last_successful_run("geo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_fetched_percentage_and_prune() {
        let store = LocalStore::new().with_bulk_size(2);
        commit_all(
            &store,
            ["a", "b", "c", "d"].iter().map(|id| entity("geo", id)).collect(),
        )
        .await;

        let token = store.begin_transaction().await.unwrap();
        store.add_entity_to_bulk(entity("geo", "a")).await.unwrap();
        store.add_entity_to_bulk(entity("geo", "b")).await.unwrap();
        store.add_entity_to_bulk(entity("geo", "c")).await.unwrap();

        let percentage = store.non_fetched_percentage("geo", &token).await.unwrap();
        assert_eq!(percentage, 25.0);
        assert_eq!(store.delete_non_fetched_datasets("geo", &token).await.unwrap(), 1);

        // Deletion waits for commit.
        assert_eq!(store.get_dataset_identifiers("geo").await.unwrap().len(), 4);
        store.commit_transaction().await.unwrap();
        assert_eq!(store.get_dataset_identifiers("geo").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_non_fetched_percentage_without_history() {
        let store = LocalStore::new();
        let token = store.begin_transaction().await.unwrap();
        assert_eq!(store.non_fetched_percentage("geo", &token).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_sources_are_isolated() {
        let store = LocalStore::new();
        commit_all(&store, vec![entity("one", "a"), entity("two", "a")]).await;

        let token = store.begin_transaction().await.unwrap();
        store.add_entity_to_bulk(entity("one", "a")).await.unwrap();
        store.delete_non_fetched_datasets("one", &token).await.unwrap();
        store.commit_transaction().await.unwrap();

        assert_eq!(store.get_dataset_identifiers("two").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_transaction_guards() {
        let store = LocalStore::new();
        assert!(store.add_entity_to_bulk(entity("geo", "a")).await.is_err());
        assert!(store.commit_transaction().await.is_err());

        let token = store.begin_transaction().await.unwrap();
        assert!(store.begin_transaction().await.is_err());
        store.rollback_transaction().await.unwrap();

        store.begin_transaction().await.unwrap();
        assert!(store.non_fetched_percentage("geo", &token).await.is_err());
    }

    #[tokio::test]
    async fn test_transaction_view_includes_flushed_services() {
        let store = LocalStore::new();
        commit_all(&store, vec![entity("geo", "ds")]).await;

        store.begin_transaction().await.unwrap();
        store.add_entity_to_bulk(service("geo", "svc")).await.unwrap();
        assert!(store.get_services("geo").await.unwrap().is_empty());

        store.send_bulk_data().await.unwrap();
        let services = store.get_services("geo").await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(store.get_datasets("geo").await.unwrap()[0].identifier, "ds");
    }

    #[tokio::test]
    async fn test_directory_store_round_trip() {
        let dir = tempdir().unwrap();
        let at = Utc::now();
        {
            let store = LocalStore::open(dir.path()).await.unwrap();
            store.begin_transaction().await.unwrap();
            store.add_entity_to_bulk(entity("geo", "urn:x/1")).await.unwrap();
            store
                .add_coupling_to_bulk(CouplingEntity {
                    dataset_identifier: "urn:x/1".to_string(),
                    service_id: "svc".to_string(),
                    service_type: ServiceType::Wms,
                    source: "geo".to_string(),
                    distribution: Distribution {
                        access_url: "https://example.org/wms".to_string(),
                        ..Distribution::default()
                    },
                })
                .await
                .unwrap();
            store.mark_successful_run("geo", at).await.unwrap();
            store.commit_transaction().await.unwrap();
        }

        assert!(dir
            .path()
            .join("geo/records/urn%3Ax%2F1.yaml")
            .exists());

        let reopened = LocalStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get_dataset_identifiers("geo").await.unwrap(),
            vec!["urn:x/1"]
        );
        assert_eq!(reopened.get_couplings("geo").await.unwrap().len(), 1);
        assert_eq!(reopened.last_successful_run("geo").await.unwrap(), Some(at));
    }

    #[tokio::test]
    async fn test_directory_store_removes_pruned_files() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();
        commit_all(&store, vec![entity("geo", "a"), entity("geo", "b")]).await;

        let token = store.begin_transaction().await.unwrap();
        store.add_entity_to_bulk(entity("geo", "a")).await.unwrap();
        store.delete_non_fetched_datasets("geo", &token).await.unwrap();
        store.commit_transaction().await.unwrap();

        assert!(dir.path().join("geo/records/a.yaml").exists());
        assert!(!dir.path().join("geo/records/b.yaml").exists());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("abc-1_2"), "abc-1_2");
        assert_eq!(file_stem("a.b"), "a%2Eb");
        assert_eq!(file_stem("../x"), "%2E%2E%2Fx");
    }
}
