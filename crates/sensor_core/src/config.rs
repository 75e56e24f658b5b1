//! Configuração unificada via TOML.
//!
//! Portas, thresholds e destinos ficam em um único `config.toml` ao lado
//! do executável.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::types::Transport;

/// Erros ao salvar a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de serialização TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuração dos dois transportes seriais.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Porta do Master (ex: "COM5", "/dev/ttyUSB0")
    pub master_port: String,
    /// Porta do Backup
    pub backup_port: String,
    pub baud_rate: u32,
    /// Timeout de cada leitura de linha (segundos)
    pub read_timeout_secs: f64,
    /// Espera após abrir a porta para o Arduino estabilizar (segundos)
    pub settle_secs: f64,
    /// Quantos frames descartar após conectar
    pub warmup_frames: u32,
    /// Pausa entre tentativas do descarte (segundos)
    pub warmup_pause_secs: f64,
    /// Silêncio máximo do Master antes do failover (segundos)
    pub liveness_timeout_secs: f64,
    /// Intervalo de polling quando não há dados (segundos)
    pub idle_poll_secs: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            master_port: "COM5".into(),
            backup_port: "COM2".into(),
            baud_rate: 9600,
            read_timeout_secs: 1.0,
            settle_secs: 5.0,
            warmup_frames: 15,
            warmup_pause_secs: 0.1,
            liveness_timeout_secs: 5.0,
            idle_poll_secs: 0.1,
        }
    }
}

impl TransportConfig {
    pub fn port_for(&self, transport: Transport) -> &str {
        match transport {
            Transport::Master => &self.master_port,
            Transport::Backup => &self.backup_port,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        secs(self.read_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        secs(self.settle_secs)
    }

    pub fn warmup_pause(&self) -> Duration {
        secs(self.warmup_pause_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        secs(self.liveness_timeout_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        secs(self.idle_poll_secs)
    }
}

/// Valores negativos ou NaN viram zero em vez de panic.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Thresholds de classificação (mesmos valores do firmware do Arduino).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Acima disso → Overvoltage (V)
    pub voltage: f64,
    /// Acima disso → Overheat (°C)
    pub temperature: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            voltage: 5.5,
            temperature: 30.0,
        }
    }
}

/// Destinos das tabelas estruturadas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Diretório base dos datasets
    pub dir: PathBuf,
    pub master_dataset: String,
    pub backup_dataset: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            master_dataset: "master_data".into(),
            backup_dataset: "backup_data".into(),
        }
    }
}

impl StorageConfig {
    pub fn dataset_for(&self, transport: Transport) -> &str {
        match transport {
            Transport::Master => &self.master_dataset,
            Transport::Backup => &self.backup_dataset,
        }
    }
}

/// Arquivo bruto (hex + texto de cada frame).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("raw_serial_log.txt"),
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub thresholds: Thresholds,
    pub storage: StorageConfig,
    pub archive: ArchiveConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let t = &self.transport;

        if t.master_port.trim().is_empty() {
            errors.push("Porta do Master não pode ser vazia".into());
        }
        if t.backup_port.trim().is_empty() {
            errors.push("Porta do Backup não pode ser vazia".into());
        }
        if !t.master_port.is_empty() && t.master_port == t.backup_port {
            errors.push(format!(
                "Master e Backup usam a mesma porta: {}",
                t.master_port
            ));
        }
        if t.baud_rate == 0 {
            errors.push("Baud rate não pode ser 0".into());
        }
        if t.read_timeout_secs <= 0.0 || t.read_timeout_secs > 60.0 {
            errors.push(format!(
                "Timeout de leitura inválido: {} (0–60s)",
                t.read_timeout_secs
            ));
        }
        if t.liveness_timeout_secs <= 0.0 {
            errors.push(format!(
                "Timeout de failover inválido: {}",
                t.liveness_timeout_secs
            ));
        }
        for (name, value) in [
            ("settle_secs", t.settle_secs),
            ("warmup_pause_secs", t.warmup_pause_secs),
            ("idle_poll_secs", t.idle_poll_secs),
        ] {
            if value.is_nan() || value < 0.0 {
                errors.push(format!("{name} inválido: {value}"));
            }
        }
        if !self.thresholds.voltage.is_finite() || !self.thresholds.temperature.is_finite() {
            errors.push("Thresholds devem ser números finitos".into());
        }
        if self.storage.master_dataset.trim().is_empty()
            || self.storage.backup_dataset.trim().is_empty()
        {
            errors.push("Nome de dataset não pode ser vazio".into());
        }
        if self.storage.master_dataset == self.storage.backup_dataset {
            errors.push("Master e Backup precisam de datasets distintos".into());
        }

        errors
    }
}
