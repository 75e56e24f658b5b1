//! Seleção de transporte – Master com failover para Backup.
//!
//! ```text
//!            Master ok                  silêncio > timeout, Backup ok
//!   INIT ─────────────▶ MASTER_ACTIVE ─────────────────────────────▶ BACKUP_ACTIVE
//!    │  Master falha,         │ timeout + Backup falha                    │
//!    │  Backup ok             │ ou erro de I/O                            │ erro de I/O
//!    ├──────────────▶ BACKUP_ACTIVE                                       │
//!    │  ambos falham          ▼                                           ▼
//!    └──────────────▶ TERMINATED ◀─────────────────────────────────────────┘
//! ```
//!
//! Não existe failback: depois do Backup, o Master nunca volta na mesma execução.

use sensor_core::config::TransportConfig;
use sensor_core::Transport;
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Falha ao abrir um transporte.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Erro ao abrir porta serial {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Erro ao limpar buffers de {port}: {source}")]
    Clear {
        port: String,
        #[source]
        source: io::Error,
    },
}

/// Falha de I/O no meio do stream. Sempre fatal.
#[derive(Debug, thiserror::Error)]
#[error("Erro serial em {port}: {source}")]
pub struct TransportError {
    pub port: String,
    #[source]
    pub source: io::Error,
}

// ──────────────────────────────────────────────
// Abstração do link serial
// ──────────────────────────────────────────────

/// Link serial aberto. Fechar = drop.
pub trait SerialLink {
    fn port_name(&self) -> &str;
    /// Bytes disponíveis sem bloquear.
    fn bytes_waiting(&mut self) -> io::Result<u32>;
    /// Lê uma linha (até `\n` inclusive), limitada pelo timeout de leitura.
    fn read_frame(&mut self) -> io::Result<Vec<u8>>;
    fn clear_buffers(&mut self) -> io::Result<()>;
}

/// Abre links seriais por nome de porta.
pub trait LinkOpener {
    fn open(&mut self, port: &str, config: &TransportConfig) -> Result<Box<dyn SerialLink>, ConnectError>;
}

/// Link real via crate `serialport`.
pub struct SerialPortLink {
    name: String,
    port: Box<dyn SerialPort>,
    read_timeout: Duration,
}

impl SerialLink for SerialPortLink {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn bytes_waiting(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::from)
    }

    fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let start = Instant::now();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        while start.elapsed() < self.read_timeout {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(line)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::All).map_err(io::Error::from)
    }
}

/// Abre portas reais em 8N1.
#[derive(Debug, Default)]
pub struct SerialPortOpener;

impl LinkOpener for SerialPortOpener {
    fn open(&mut self, port: &str, config: &TransportConfig) -> Result<Box<dyn SerialLink>, ConnectError> {
        let handle = serialport::new(port, config.baud_rate)
            .timeout(config.read_timeout())
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|source| ConnectError::Open {
                port: port.to_string(),
                source,
            })?;

        Ok(Box::new(SerialPortLink {
            name: port.to_string(),
            port: handle,
            read_timeout: config.read_timeout(),
        }))
    }
}

// ──────────────────────────────────────────────
// Máquina de estados
// ──────────────────────────────────────────────

/// Fase do seletor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Init,
    MasterActive,
    BackupActive,
    Terminated,
}

impl LinkPhase {
    /// Transporte que detém a persistência nesta fase.
    pub fn owner(self) -> Option<Transport> {
        match self {
            LinkPhase::MasterActive => Some(Transport::Master),
            LinkPhase::BackupActive => Some(Transport::Backup),
            LinkPhase::Init | LinkPhase::Terminated => None,
        }
    }
}

/// Snapshot do estado do link (para status/diagnóstico).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    pub active: Option<Transport>,
    pub last_frame: Instant,
    pub deadline: Option<Instant>,
}

/// Dono exclusivo do link ativo e do timer de failover.
pub struct TransportSelector<O> {
    opener: O,
    config: TransportConfig,
    phase: LinkPhase,
    link: Option<Box<dyn SerialLink>>,
    last_frame: Instant,
    failovers: u32,
}

impl<O: LinkOpener> TransportSelector<O> {
    pub fn new(opener: O, config: TransportConfig) -> Self {
        Self {
            opener,
            config,
            phase: LinkPhase::Init,
            link: None,
            last_frame: Instant::now(),
            failovers: 0,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn failovers(&self) -> u32 {
        self.failovers
    }

    pub fn state(&self) -> LinkState {
        let watched = self.phase == LinkPhase::MasterActive;
        LinkState {
            active: self.phase.owner(),
            last_frame: self.last_frame,
            deadline: watched.then(|| self.last_frame + self.config.liveness_timeout()),
        }
    }

    /// INIT → MASTER_ACTIVE | BACKUP_ACTIVE | TERMINATED.
    pub fn start(&mut self) -> LinkPhase {
        if self.phase != LinkPhase::Init {
            return self.phase;
        }

        match self.connect(Transport::Master) {
            Ok(link) => self.activate(LinkPhase::MasterActive, link),
            Err(e) => {
                error!("{e}");
                match self.connect(Transport::Backup) {
                    Ok(link) => self.activate(LinkPhase::BackupActive, link),
                    Err(e) => {
                        error!("{e}");
                        error!("Falha ao conectar ao Backup. Encerrando...");
                        self.terminate()
                    }
                }
            }
        }
    }

    /// Lê um frame se houver dados disponíveis. Rearma o timer de liveness.
    pub fn next_frame(&mut self, now: Instant) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(link) = self.link.as_mut() else {
            return Ok(None);
        };

        let waiting = link.bytes_waiting().map_err(|source| TransportError {
            port: link.port_name().to_string(),
            source,
        })?;
        if waiting == 0 {
            return Ok(None);
        }

        let frame = link.read_frame().map_err(|source| TransportError {
            port: link.port_name().to_string(),
            source,
        })?;
        self.last_frame = now;
        Ok(Some(frame))
    }

    /// Checa o timeout do Master e faz failover se necessário.
    ///
    /// Só tem efeito em MASTER_ACTIVE; o silêncio é medido a partir do
    /// último frame recebido (ou do fim do warm-up).
    pub fn check_liveness(&mut self, now: Instant) -> LinkPhase {
        let Some(deadline) = self.state().deadline else {
            return self.phase;
        };
        if now <= deadline {
            return self.phase;
        }
        let silence = now.saturating_duration_since(self.last_frame);

        warn!(
            "Master sem dados há {:.1}s. Tentando Backup ({})...",
            silence.as_secs_f64(),
            self.config.backup_port
        );
        self.link = None;

        match self.connect(Transport::Backup) {
            Ok(link) => {
                let phase = self.activate(LinkPhase::BackupActive, link);
                if phase == LinkPhase::BackupActive {
                    self.failovers += 1;
                    info!("Failover concluído. Escutando o Backup...");
                }
                phase
            }
            Err(e) => {
                error!("{e}");
                error!("Falha ao conectar ao Backup. Encerrando...");
                self.terminate()
            }
        }
    }

    /// Erro de transporte fatal → TERMINATED.
    pub fn fail(&mut self, err: &TransportError) -> LinkPhase {
        error!("{err}");
        self.terminate()
    }

    /// Fecha o link ativo (shutdown gracioso).
    pub fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            info!("Porta serial {} fechada", link.port_name());
        }
        self.phase = LinkPhase::Terminated;
    }

    fn connect(&mut self, transport: Transport) -> Result<Box<dyn SerialLink>, ConnectError> {
        let port = self.config.port_for(transport).to_string();
        let mut link = self.opener.open(&port, &self.config)?;
        info!("Conectado a {port} ({transport}) a {} baud", self.config.baud_rate);

        // Arduino reinicia ao abrir a porta
        std::thread::sleep(self.config.settle_delay());
        link.clear_buffers()
            .map_err(|source| ConnectError::Clear { port, source })?;
        Ok(link)
    }

    fn activate(&mut self, phase: LinkPhase, link: Box<dyn SerialLink>) -> LinkPhase {
        self.link = Some(link);
        self.phase = phase;

        match self.warm_up() {
            Ok(discarded) => {
                debug!("Warm-up: {discarded} frames descartados");
                self.last_frame = Instant::now();
                self.phase
            }
            Err(e) => self.fail(&e),
        }
    }

    /// Descarta até `warmup_frames` frames de ruído de boot.
    fn warm_up(&mut self) -> Result<u32, TransportError> {
        let mut discarded = 0;
        let pause = self.config.warmup_pause();
        let Some(link) = self.link.as_mut() else {
            return Ok(0);
        };

        let port = link.port_name().to_string();
        let io_err = |source| TransportError {
            port: port.clone(),
            source,
        };

        for _ in 0..self.config.warmup_frames {
            if link.bytes_waiting().map_err(io_err)? > 0 {
                link.read_frame().map_err(io_err)?;
                discarded += 1;
            }
            std::thread::sleep(pause);
        }
        Ok(discarded)
    }

    fn terminate(&mut self) -> LinkPhase {
        self.link = None;
        self.phase = LinkPhase::Terminated;
        self.phase
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};

    /// Link em memória: entrega frames de uma fila.
    pub struct MockLink {
        pub name: String,
        pub frames: VecDeque<Vec<u8>>,
        pub fail_read: bool,
        pub fail_clear: bool,
    }

    impl SerialLink for MockLink {
        fn port_name(&self) -> &str {
            &self.name
        }

        fn bytes_waiting(&mut self) -> io::Result<u32> {
            Ok(self.frames.front().map_or(0, |f| f.len().max(1) as u32))
        }

        fn read_frame(&mut self) -> io::Result<Vec<u8>> {
            if self.fail_read {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cabo desconectado"));
            }
            Ok(self.frames.pop_front().unwrap_or_default())
        }

        fn clear_buffers(&mut self) -> io::Result<()> {
            if self.fail_clear {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "porta sumiu"));
            }
            Ok(())
        }
    }

    /// Opener com portas pré-configuradas; porta ausente = falha ao abrir.
    #[derive(Default)]
    pub struct MockOpener {
        pub ports: HashMap<String, VecDeque<Vec<u8>>>,
        pub fail_reads: bool,
        /// Portas que abrem mas falham na leitura
        pub unreadable: HashSet<String>,
        /// Portas que abrem mas falham ao limpar os buffers
        pub uncleared: HashSet<String>,
        pub opened: Vec<String>,
    }

    impl MockOpener {
        pub fn with_port(mut self, port: &str, frames: &[&str]) -> Self {
            self.ports.insert(
                port.to_string(),
                frames.iter().map(|f| format!("{f}\r\n").into_bytes()).collect(),
            );
            self
        }
    }

    impl LinkOpener for MockOpener {
        fn open(&mut self, port: &str, _config: &TransportConfig) -> Result<Box<dyn SerialLink>, ConnectError> {
            self.opened.push(port.to_string());
            match self.ports.remove(port) {
                Some(frames) => Ok(Box::new(MockLink {
                    name: port.to_string(),
                    frames,
                    fail_read: self.fail_reads || self.unreadable.contains(port),
                    fail_clear: self.uncleared.contains(port),
                })),
                None => Err(ConnectError::Open {
                    port: port.to_string(),
                    source: serialport::Error::new(serialport::ErrorKind::NoDevice, "porta inexistente"),
                }),
            }
        }
    }

    /// Config sem esperas, para testes rápidos.
    pub fn fast_config() -> TransportConfig {
        TransportConfig {
            master_port: "MASTER".into(),
            backup_port: "BACKUP".into(),
            settle_secs: 0.0,
            warmup_frames: 2,
            warmup_pause_secs: 0.0,
            liveness_timeout_secs: 5.0,
            idle_poll_secs: 0.0,
            ..TransportConfig::default()
        }
    }
}
