//! Armazenamento estruturado – um dataset por fonte.
//!
//! Cada dataset é um diretório com duas tabelas CSV:
//!
//! ```text
//! master_data/
//! ├── Readings.csv   # Timestamp, Device, Voltage (V), Temperature (C), Status
//! └── Errors.csv     # mesmas colunas + Error Link (linha 1-based em Readings)
//! ```
//!
//! Toda escrita substitui as duas tabelas inteiras, nunca faz append
//! incremental. As duas são preparadas em `.tmp` e só então trocadas; se a
//! troca de uma falhar, a outra volta ao conteúdo anterior.

use chrono::NaiveDateTime;
use sensor_core::table::TableError;
use sensor_core::types::{ErrorRecord, Reading, TIMESTAMP_FORMAT, format_timestamp};
use sensor_core::{Device, SourceTable, Status};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const READINGS_FILE: &str = "Readings.csv";
pub const ERRORS_FILE: &str = "Errors.csv";

pub const READING_COLUMNS: [&str; 5] = ["Timestamp", "Device", "Voltage (V)", "Temperature (C)", "Status"];
pub const ERROR_COLUMNS: [&str; 6] = [
    "Timestamp",
    "Device",
    "Voltage (V)",
    "Temperature (C)",
    "Status",
    "Error Link",
];

/// Erros do armazenamento estruturado.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Destino ocupado/bloqueado: {path} ({source})")]
    Busy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Erro CSV em {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Colunas incompatíveis em {path}: {found:?}")]
    Schema { path: PathBuf, found: Vec<String> },

    #[error("Timestamp inválido em {path}: '{value}'")]
    Timestamp { path: PathBuf, value: String },

    #[error("Tabela inconsistente em {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}

impl StoreError {
    /// Destino bloqueado por outro processo (ex: planilha aberta).
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy { .. })
    }

    /// Conteúdo ilegível como dataset (colunas, linhas ou links inválidos).
    /// Falhas de leitura do arquivo em si não entram aqui.
    pub fn is_corrupt(&self) -> bool {
        match self {
            StoreError::Schema { .. } | StoreError::Timestamp { .. } | StoreError::Table { .. } => true,
            StoreError::Csv { source, .. } => !source.is_io_error(),
            StoreError::Busy { .. } | StoreError::Io { .. } => false,
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if is_busy_error(&source) {
            StoreError::Busy { path, source }
        } else {
            StoreError::Io { path, source }
        }
    }
}

fn is_busy_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
    ) {
        return true;
    }
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(32 | 33))
}

/// Contrato do armazenamento: leitura no boot e substituição total.
pub trait TableStore {
    /// Destino atual das escritas.
    fn destination(&self) -> &Path;

    /// Carrega o dataset. `Ok(None)` se ainda não existe.
    fn load(&mut self) -> Result<Option<SourceTable>, StoreError>;

    /// Substitui Readings e Errors pelo snapshot da tabela.
    fn replace_all(&mut self, table: &SourceTable) -> Result<(), StoreError>;

    /// Redireciona as próximas escritas para um destino novo e único.
    fn switch_to_fallback(&mut self, stamp: &str) -> &Path;
}

// ──────────────────────────────────────────────
// Linhas CSV
// ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ReadingRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Device")]
    device: Device,
    #[serde(rename = "Voltage (V)")]
    voltage: f64,
    #[serde(rename = "Temperature (C)")]
    temperature: f64,
    #[serde(rename = "Status")]
    status: Status,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Device")]
    device: Device,
    #[serde(rename = "Voltage (V)")]
    voltage: f64,
    #[serde(rename = "Temperature (C)")]
    temperature: f64,
    #[serde(rename = "Status")]
    status: Status,
    #[serde(rename = "Error Link")]
    link: usize,
}

impl From<&Reading> for ReadingRow {
    fn from(r: &Reading) -> Self {
        Self {
            timestamp: format_timestamp(&r.timestamp),
            device: r.device,
            voltage: r.voltage,
            temperature: r.temperature,
            status: r.status,
        }
    }
}

impl From<&ErrorRecord> for ErrorRow {
    fn from(e: &ErrorRecord) -> Self {
        let r = &e.reading;
        Self {
            timestamp: format_timestamp(&r.timestamp),
            device: r.device,
            voltage: r.voltage,
            temperature: r.temperature,
            status: r.status,
            link: e.link,
        }
    }
}

fn parse_timestamp(path: &Path, value: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|_| StoreError::Timestamp {
        path: path.to_path_buf(),
        value: value.to_string(),
    })
}

// ──────────────────────────────────────────────
// Implementação CSV
// ──────────────────────────────────────────────

/// Dataset em diretório com `Readings.csv` e `Errors.csv`.
#[derive(Debug, Clone)]
pub struct CsvTableStore {
    root: PathBuf,
    dataset: String,
    active: PathBuf,
}

impl CsvTableStore {
    pub fn new(root: impl Into<PathBuf>, dataset: impl Into<String>) -> Self {
        let root = root.into();
        let dataset = dataset.into();
        let active = root.join(&dataset);
        Self {
            root,
            dataset,
            active,
        }
    }

    fn read_readings(path: &Path) -> Result<Vec<Reading>, StoreError> {
        let mut reader = open_reader(path, &READING_COLUMNS)?;
        let mut readings = Vec::new();
        for row in reader.deserialize::<ReadingRow>() {
            let row = row.map_err(|source| csv_error(path, source))?;
            readings.push(Reading {
                timestamp: parse_timestamp(path, &row.timestamp)?,
                device: row.device,
                voltage: row.voltage,
                temperature: row.temperature,
                status: row.status,
            });
        }
        Ok(readings)
    }

    fn read_errors(path: &Path) -> Result<Vec<ErrorRecord>, StoreError> {
        let mut reader = open_reader(path, &ERROR_COLUMNS)?;
        let mut errors = Vec::new();
        for row in reader.deserialize::<ErrorRow>() {
            let row = row.map_err(|source| csv_error(path, source))?;
            errors.push(ErrorRecord {
                reading: Reading {
                    timestamp: parse_timestamp(path, &row.timestamp)?,
                    device: row.device,
                    voltage: row.voltage,
                    temperature: row.temperature,
                    status: row.status,
                },
                link: row.link,
            });
        }
        Ok(errors)
    }
}

impl TableStore for CsvTableStore {
    fn destination(&self) -> &Path {
        &self.active
    }

    fn load(&mut self) -> Result<Option<SourceTable>, StoreError> {
        let readings_path = self.active.join(READINGS_FILE);
        if !readings_path.exists() {
            return Ok(None);
        }
        let readings = Self::read_readings(&readings_path)?;

        // Errors ausente → tabela vazia; será criado na próxima escrita
        let errors_path = self.active.join(ERRORS_FILE);
        let errors = if errors_path.exists() {
            Self::read_errors(&errors_path)?
        } else {
            Vec::new()
        };

        SourceTable::from_parts(readings, errors)
            .map(Some)
            .map_err(|source| StoreError::Table {
                path: self.active.clone(),
                source,
            })
    }

    fn replace_all(&mut self, table: &SourceTable) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.active).map_err(|e| StoreError::io(&self.active, e))?;

        let readings = stage_table(
            &self.active.join(READINGS_FILE),
            &READING_COLUMNS,
            table.readings().iter().map(ReadingRow::from),
        )?;
        let errors = match stage_table(
            &self.active.join(ERRORS_FILE),
            &ERROR_COLUMNS,
            table.errors().iter().map(ErrorRow::from),
        ) {
            Ok(staged) => staged,
            Err(e) => {
                readings.discard();
                return Err(e);
            }
        };

        commit(&[readings, errors])
    }

    fn switch_to_fallback(&mut self, stamp: &str) -> &Path {
        let base = format!("{}_{}", self.dataset, stamp);
        let mut candidate = self.root.join(&base);
        let mut n = 1;
        while candidate.exists() {
            candidate = self.root.join(format!("{base}_{n}"));
            n += 1;
        }
        self.active = candidate;
        &self.active
    }
}

fn csv_error(path: &Path, source: csv::Error) -> StoreError {
    StoreError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn open_reader(path: &Path, expected: &[&str]) -> Result<csv::Reader<File>, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader.headers().map_err(|source| csv_error(path, source))?;

    if !headers.iter().eq(expected.iter().copied()) {
        return Err(StoreError::Schema {
            path: path.to_path_buf(),
            found: headers.iter().map(str::to_string).collect(),
        });
    }
    Ok(reader)
}

/// Tabela já gravada em `.tmp`, aguardando a troca.
struct Staged {
    tmp: PathBuf,
    path: PathBuf,
    backup: PathBuf,
}

impl Staged {
    fn discard(&self) {
        let _ = std::fs::remove_file(&self.tmp);
    }

    /// Move o arquivo atual para `.bak` e coloca o `.tmp` no lugar.
    /// Retorna se havia arquivo anterior.
    fn swap_in(&self) -> Result<bool, StoreError> {
        let had_previous = self.path.exists();
        if had_previous {
            std::fs::rename(&self.path, &self.backup).map_err(|e| StoreError::io(&self.path, e))?;
        }
        if let Err(e) = std::fs::rename(&self.tmp, &self.path) {
            if had_previous {
                let _ = std::fs::rename(&self.backup, &self.path);
            }
            return Err(StoreError::io(&self.path, e));
        }
        Ok(had_previous)
    }

    /// Desfaz um `swap_in` bem-sucedido.
    fn restore(&self, had_previous: bool) {
        if had_previous {
            let _ = std::fs::rename(&self.backup, &self.path);
        } else {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Escreve cabeçalho + linhas em `<arquivo>.tmp`.
fn stage_table<R: Serialize>(
    path: &Path,
    columns: &[&str],
    rows: impl Iterator<Item = R>,
) -> Result<Staged, StoreError> {
    let staged = Staged {
        tmp: path.with_extension("csv.tmp"),
        path: path.to_path_buf(),
        backup: path.with_extension("csv.bak"),
    };
    // .bak esquecido por uma execução interrompida
    let _ = std::fs::remove_file(&staged.backup);

    let result = write_rows(&staged.tmp, columns, rows);
    if result.is_err() {
        staged.discard();
    }
    result.map(|()| staged)
}

fn write_rows<R: Serialize>(
    tmp: &Path,
    columns: &[&str],
    rows: impl Iterator<Item = R>,
) -> Result<(), StoreError> {
    let file = File::create(tmp).map_err(|e| StoreError::io(tmp, e))?;

    // Cabeçalho explícito: tabela vazia também precisa das colunas
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer
        .write_record(columns)
        .map_err(|source| csv_error(tmp, source))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|source| csv_error(tmp, source))?;
    }
    writer.flush().map_err(|e| StoreError::io(tmp, e))?;

    let mut file = writer
        .into_inner()
        .map_err(|e| StoreError::io(tmp, e.into_error()))?;
    file.flush().map_err(|e| StoreError::io(tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(tmp, e))?;
    Ok(())
}

/// Troca todas as tabelas preparadas, ou nenhuma.
fn commit(staged: &[Staged]) -> Result<(), StoreError> {
    let mut swapped: Vec<(&Staged, bool)> = Vec::with_capacity(staged.len());
    for (i, table) in staged.iter().enumerate() {
        match table.swap_in() {
            Ok(had_previous) => swapped.push((table, had_previous)),
            Err(e) => {
                for (done, had_previous) in swapped.iter().rev() {
                    done.restore(*had_previous);
                }
                for pending in &staged[i..] {
                    pending.discard();
                }
                return Err(e);
            }
        }
    }
    for table in staged {
        let _ = std::fs::remove_file(&table.backup);
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
