//! Sink Writer – tabelas por fonte e persistência resiliente.
//!
//! Cada leitura é anexada à tabela do transporte ativo e a tabela inteira
//! é regravada na hora. Destino bloqueado → dataset de fallback (uma nova
//! tentativa, e as próximas escritas seguem no fallback). Outras falhas
//! são reportadas; a próxima escrita bem-sucedida inclui o que faltou.

use chrono::Local;
use sensor_core::{Reading, SourceTable, Transport};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::store::{StoreError, TableStore};

/// Resultado de uma persistência.
#[derive(Debug)]
pub enum PersistOutcome {
    Saved(PathBuf),
    /// Destino original bloqueado; salvo no fallback
    SavedToFallback(PathBuf),
    Failed(StoreError),
}

impl PersistOutcome {
    pub fn is_saved(&self) -> bool {
        !matches!(self, PersistOutcome::Failed(_))
    }
}

/// Tabela + armazenamento de uma fonte.
struct TableSlot<S> {
    source: Transport,
    table: SourceTable,
    store: S,
}

impl<S: TableStore> TableSlot<S> {
    /// Carrega o histórico existente; recria o dataset se estiver
    /// ausente ou incompatível. Se não foi possível ler, o dataset fica
    /// intacto e a execução grava em um fallback.
    fn open(source: Transport, mut store: S) -> Self {
        let loaded = match store.load() {
            Ok(Some(table)) => {
                info!(
                    "{source}: {} leituras carregadas de {}",
                    table.readings().len(),
                    store.destination().display()
                );
                Some(table)
            }
            Ok(None) => None,
            Err(e) if e.is_corrupt() => {
                warn!("{source}: dataset incompatível ({e}). Criando um novo.");
                None
            }
            Err(e) => {
                warn!("{source}: não foi possível ler o dataset ({e}). Histórico mantido.");
                let fallback = store.switch_to_fallback(&fallback_stamp()).to_path_buf();
                info!("{source}: salvando no fallback {}", fallback.display());
                None
            }
        };

        let fresh = loaded.is_none();
        let mut slot = Self {
            source,
            table: loaded.unwrap_or_default(),
            store,
        };
        if fresh {
            match slot.persist() {
                PersistOutcome::Failed(e) => error!("{source}: não foi possível criar o dataset: {e}"),
                PersistOutcome::Saved(path) | PersistOutcome::SavedToFallback(path) => {
                    info!("{source}: dataset criado em {}", path.display())
                }
            }
        }
        slot
    }

    fn persist(&mut self) -> PersistOutcome {
        match self.store.replace_all(&self.table) {
            Ok(()) => PersistOutcome::Saved(self.store.destination().to_path_buf()),
            Err(e) if e.is_busy() => {
                warn!("{e}. Verifique se o arquivo não está aberto em outro programa.");
                let fallback = self.store.switch_to_fallback(&fallback_stamp()).to_path_buf();
                info!("{}: salvando no fallback {}", self.source, fallback.display());

                match self.store.replace_all(&self.table) {
                    Ok(()) => PersistOutcome::SavedToFallback(fallback),
                    Err(e) => PersistOutcome::Failed(e),
                }
            }
            Err(e) => PersistOutcome::Failed(e),
        }
    }
}

fn fallback_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Dono exclusivo das duas SourceTables (Master e Backup).
pub struct SinkWriter<S> {
    master: TableSlot<S>,
    backup: TableSlot<S>,
}

impl<S: TableStore> SinkWriter<S> {
    /// Abre (ou cria) os datasets das duas fontes.
    pub fn open(master_store: S, backup_store: S) -> Self {
        Self {
            master: TableSlot::open(Transport::Master, master_store),
            backup: TableSlot::open(Transport::Backup, backup_store),
        }
    }

    pub fn table(&self, owner: Transport) -> &SourceTable {
        &self.slot(owner).table
    }

    pub fn destination(&self, owner: Transport) -> PathBuf {
        self.slot(owner).store.destination().to_path_buf()
    }

    /// Anexa a leitura à tabela do dono e regrava a tabela inteira.
    pub fn record(&mut self, owner: Transport, reading: Reading) -> PersistOutcome {
        let slot = self.slot_mut(owner);
        let status = reading.status;
        let summary = reading.to_string();
        let link = slot.table.append(reading);

        let outcome = slot.persist();
        match &outcome {
            PersistOutcome::Saved(_) | PersistOutcome::SavedToFallback(_) => {
                let target = if link.is_some() { "Readings e Errors" } else { "Readings" };
                info!("Salvo em {owner}: {summary} → {target}");
            }
            PersistOutcome::Failed(e) => {
                error!("Erro ao salvar {owner} ({status}): {e}");
            }
        }
        outcome
    }

    fn slot(&self, owner: Transport) -> &TableSlot<S> {
        match owner {
            Transport::Master => &self.master,
            Transport::Backup => &self.backup,
        }
    }

    fn slot_mut(&mut self, owner: Transport) -> &mut TableSlot<S> {
        match owner {
            Transport::Master => &mut self.master,
            Transport::Backup => &mut self.backup,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use chrono::NaiveDate;
    use sensor_core::{Device, Status};
    use crate::store::{CsvTableStore, ERRORS_FILE, READINGS_FILE};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn reading(status: Status) -> Reading {
        Reading {
            timestamp: NaiveDate::from_ymd_opt(2024, 2, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            device: Device::Backup,
            voltage: 5.0,
            temperature: 25.0,
            status,
        }
    }

    fn writer() -> (SinkWriter<MemoryStore>, Rc<RefCell<StoreLog>>, Rc<RefCell<StoreLog>>) {
        let (master, master_log) = MemoryStore::new("master_data");
        let (backup, backup_log) = MemoryStore::new("backup_data");
        (SinkWriter::open(master, backup), master_log, backup_log)
    }

    #[test]
    fn missing_datasets_are_created_empty() {
        let (_sink, master_log, backup_log) = writer();
        assert_eq!(master_log.borrow().writes, vec![(PathBuf::from("master_data"), 0, 0)]);
        assert_eq!(backup_log.borrow().writes, vec![(PathBuf::from("backup_data"), 0, 0)]);
    }

    #[test]
    fn existing_history_is_kept() {
        let (mut master, master_log) = MemoryStore::new("master_data");
        master.initial = Some(history());
        let (backup, _) = MemoryStore::new("backup_data");
        let mut sink = SinkWriter::open(master, backup);

        // Nada reescrito no boot quando o dataset é válido
        assert!(master_log.borrow().writes.is_empty());

        sink.record(Transport::Master, reading(Status::Overvoltage));
        assert_eq!(sink.table(Transport::Master).readings().len(), 3);
        assert_eq!(sink.table(Transport::Master).errors()[1].link, 3);
    }

    #[test]
    fn every_record_rewrites_whole_table() {
        let (mut sink, master_log, backup_log) = writer();
        sink.record(Transport::Master, reading(Status::Normal));
        sink.record(Transport::Master, reading(Status::Overvoltage));
        sink.record(Transport::Master, reading(Status::Normal));

        let log = master_log.borrow();
        let counts: Vec<(usize, usize)> = log.writes.iter().skip(1).map(|w| (w.1, w.2)).collect();
        assert_eq!(counts, vec![(1, 0), (2, 1), (3, 1)]);
        assert_eq!(log.snapshots.last().unwrap(), sink.table(Transport::Master));
        assert_eq!(backup_log.borrow().writes.len(), 1);
    }

    #[test]
    fn readings_go_to_owner_table() {
        let (mut sink, _, _) = writer();
        sink.record(Transport::Master, reading(Status::Normal));
        sink.record(Transport::Backup, reading(Status::Overheat));
        assert_eq!(sink.table(Transport::Master).readings().len(), 1);
        assert_eq!(sink.table(Transport::Backup).readings().len(), 1);
        assert_eq!(sink.table(Transport::Backup).errors()[0].link, 1);
        assert!(sink.table(Transport::Master).errors().is_empty());
    }

    #[test]
    fn busy_destination_switches_to_fallback_for_rest_of_run() {
        let (mut sink, master_log, _) = writer();
        master_log.borrow_mut().faults.push_back(Fault::Busy);

        let outcome = sink.record(Transport::Master, reading(Status::Normal));
        let fallback = match outcome {
            PersistOutcome::SavedToFallback(path) => path,
            other => panic!("esperado fallback, veio {other:?}"),
        };
        assert!(fallback.to_string_lossy().starts_with("master_data_"));

        let outcome = sink.record(Transport::Master, reading(Status::Normal));
        assert!(matches!(&outcome, PersistOutcome::Saved(p) if *p == fallback));
        assert_eq!(sink.destination(Transport::Master), fallback);

        let log = master_log.borrow();
        assert_eq!(log.writes.last().unwrap(), &(fallback.clone(), 2, 0));
    }

    #[test]
    fn busy_fallback_is_tried_only_once() {
        let (mut sink, master_log, _) = writer();
        master_log
            .borrow_mut()
            .faults
            .extend([Fault::Busy, Fault::Busy]);

        let outcome = sink.record(Transport::Master, reading(Status::Normal));
        assert!(matches!(outcome, PersistOutcome::Failed(ref e) if e.is_busy()));
        assert_eq!(master_log.borrow().writes.len(), 1);
    }

    #[test]
    fn other_failure_keeps_memory_and_next_write_catches_up() {
        let (mut sink, master_log, _) = writer();
        master_log.borrow_mut().faults.push_back(Fault::Io);

        let outcome = sink.record(Transport::Master, reading(Status::Overheat));
        assert!(!outcome.is_saved());
        assert_eq!(sink.table(Transport::Master).readings().len(), 1);
        assert_eq!(sink.destination(Transport::Master), PathBuf::from("master_data"));

        sink.record(Transport::Master, reading(Status::Normal));
        let log = master_log.borrow();
        assert_eq!(log.writes.last().unwrap(), &(PathBuf::from("master_data"), 2, 1));
    }

    fn history() -> SourceTable {
        let mut table = SourceTable::new();
        table.append(reading(Status::Normal));
        table.append(reading(Status::Overheat));
        table
    }

    #[test]
    fn unreadable_history_is_kept_and_run_uses_fallback() {
        for fault in [Fault::Busy, Fault::Io] {
            let (mut master, master_log) = MemoryStore::new("master_data");
            master.initial = Some(history());
            master.load_fault = Some(fault);
            let (backup, _) = MemoryStore::new("backup_data");
            let mut sink = SinkWriter::open(master, backup);

            let fallback = sink.destination(Transport::Master);
            assert!(fallback.to_string_lossy().starts_with("master_data_"), "{fault:?}");
            sink.record(Transport::Master, reading(Status::Overvoltage));

            let log = master_log.borrow();
            assert!(log.writes.iter().all(|w| w.0 == fallback), "{fault:?}");
            assert_eq!(log.writes.last().unwrap(), &(fallback.clone(), 1, 1));
        }
    }

    #[test]
    fn corrupt_history_is_recreated_in_place() {
        let (mut master, master_log) = MemoryStore::new("master_data");
        master.initial = Some(history());
        master.load_fault = Some(Fault::Corrupt);
        let (backup, _) = MemoryStore::new("backup_data");
        let sink = SinkWriter::open(master, backup);

        assert_eq!(sink.destination(Transport::Master), PathBuf::from("master_data"));
        assert!(sink.table(Transport::Master).is_empty());
        assert_eq!(master_log.borrow().writes, vec![(PathBuf::from("master_data"), 0, 0)]);
    }

    #[test]
    fn unreadable_csv_dataset_is_not_erased() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let dataset = dir.path().join("master_data");
        let mut seeded = CsvTableStore::new(dir.path(), "master_data");
        let mut table = SourceTable::new();
        for _ in 0..3 {
            table.append(reading(Status::Overvoltage));
        }
        seeded.replace_all(&table).unwrap();

        // Errors.csv vira um diretório: erro de leitura, não de esquema
        std::fs::remove_file(dataset.join(ERRORS_FILE)).unwrap();
        std::fs::create_dir_all(dataset.join(ERRORS_FILE).join("x")).unwrap();

        let sink = SinkWriter::open(
            CsvTableStore::new(dir.path(), "master_data"),
            CsvTableStore::new(dir.path(), "backup_data"),
        );

        let readings = std::fs::read_to_string(dataset.join(READINGS_FILE)).unwrap();
        assert_eq!(readings.lines().count(), 4);
        assert_ne!(sink.destination(Transport::Master), dataset);
    }

    #[test]
    fn busy_at_creation_uses_fallback() {
        let (master, master_log) = MemoryStore::new("master_data");
        master_log.borrow_mut().faults.push_back(Fault::Busy);
        let (backup, _) = MemoryStore::new("backup_data");
        let sink = SinkWriter::open(master, backup);

        assert!(
            sink.destination(Transport::Master)
                .to_string_lossy()
                .starts_with("master_data_")
        );
    }
}
