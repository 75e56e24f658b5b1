//! Loop de ingestão – Decode → Parse → Classify → Persist.
//!
//! Single-thread e cooperativo: cada iteração checa se há dados no
//! transporte ativo, processa no máximo um frame de forma síncrona e,
//! sem dados, dorme `idle_poll` antes de checar o timeout do Master.

use chrono::{Local, NaiveDateTime};
use sensor_core::config::Thresholds;
use sensor_core::types::format_timestamp;
use sensor_core::{classify, parse_line, ProtocolError, RawFrame, Reading, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::archive::RawArchive;
use crate::sink::{PersistOutcome, SinkWriter};
use crate::store::TableStore;
use crate::transport::{LinkOpener, LinkPhase, TransportSelector};

/// O que aconteceu com um frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Frame vazio ou sem marcador de dispositivo (só arquivado)
    Ignored,
    /// Linha reconhecida mas malformada
    Malformed(ProtocolError),
    Recorded {
        reading: Reading,
        owner: Transport,
        persist: PersistOutcome,
    },
}

/// Contadores da execução (mensagem final).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames: u64,
    pub readings: u64,
    pub errors: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub persist_failures: u64,
    /// Leituras gravadas após o failover
    pub backup_readings: u64,
    pub failovers: u32,
}

/// Por que o loop terminou.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Interrupted,
    /// Conexões esgotadas ou erro fatal de transporte
    TransportLost,
}

/// Estado completo da execução, passado explicitamente pelo loop.
pub struct IngestContext<O, S> {
    selector: TransportSelector<O>,
    sink: SinkWriter<S>,
    archive: RawArchive,
    thresholds: Thresholds,
    idle_poll: Duration,
    stats: RunStats,
}

impl<O: LinkOpener, S: TableStore> IngestContext<O, S> {
    pub fn new(
        selector: TransportSelector<O>,
        sink: SinkWriter<S>,
        archive: RawArchive,
        thresholds: Thresholds,
        idle_poll: Duration,
    ) -> Self {
        Self {
            selector,
            sink,
            archive,
            thresholds,
            idle_poll,
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            failovers: self.selector.failovers(),
            ..self.stats
        }
    }

    pub fn sink(&self) -> &SinkWriter<S> {
        &self.sink
    }

    /// Conecta e roda até interrupção ou perda do transporte.
    pub fn run(&mut self, stop: &AtomicBool) -> ExitReason {
        if self.selector.start() == LinkPhase::Terminated {
            return ExitReason::TransportLost;
        }
        if let Some(owner) = self.selector.state().active {
            info!("Escutando {owner}... Ctrl+C para parar.");
        }

        let reason = loop {
            if stop.load(Ordering::Relaxed) {
                info!("Interrompido pelo usuário.");
                break ExitReason::Interrupted;
            }
            if self.step(Instant::now()) == LinkPhase::Terminated {
                break ExitReason::TransportLost;
            }
        };

        let idle = self.selector.state().last_frame.elapsed();
        info!("Último frame há {:.1}s", idle.as_secs_f64());
        self.selector.shutdown();
        reason
    }

    /// Uma iteração do loop. Retorna a fase após a iteração.
    pub fn step(&mut self, now: Instant) -> LinkPhase {
        match self.selector.next_frame(now) {
            Ok(Some(bytes)) => {
                self.process_frame(bytes, Local::now().naive_local());
            }
            Ok(None) => std::thread::sleep(self.idle_poll),
            Err(e) => {
                self.archive.record_note(&now_stamp(), &format!("Serial Error: {e}"));
                return self.selector.fail(&e);
            }
        }
        self.selector.check_liveness(now)
    }

    /// Pipeline completo de um frame. Nunca falha.
    pub fn process_frame(&mut self, bytes: Vec<u8>, timestamp: NaiveDateTime) -> FrameOutcome {
        let outcome = self.pipeline(bytes, timestamp);
        self.stats.count(&outcome);
        outcome
    }

    fn pipeline(&mut self, bytes: Vec<u8>, timestamp: NaiveDateTime) -> FrameOutcome {
        let frame = RawFrame::decode(bytes, timestamp);
        self.archive.record_frame(&frame);

        let Some(text) = frame.text.as_deref() else {
            return FrameOutcome::Ignored;
        };

        let line = match parse_line(text) {
            Ok(Some(line)) => line,
            Ok(None) => return FrameOutcome::Ignored,
            Err(e) => {
                warn!("Erro ao interpretar linha '{text}': {e}");
                self.archive
                    .record_note(&format_timestamp(&timestamp), &format!("Parse Error: {e}"));
                return FrameOutcome::Malformed(e);
            }
        };
        info!("{text}");

        // Fora de uma fase ativa não há dono para a leitura
        let Some(owner) = self.selector.phase().owner() else {
            return FrameOutcome::Ignored;
        };

        let reading = Reading {
            timestamp,
            device: line.device,
            voltage: line.voltage,
            temperature: line.temperature,
            status: classify(line.voltage, line.temperature, &self.thresholds),
        };

        let persist = self.sink.record(owner, reading.clone());
        if let PersistOutcome::Failed(e) = &persist {
            self.archive
                .record_note(&format_timestamp(&timestamp), &format!("Save Error: {e}"));
        }

        FrameOutcome::Recorded {
            reading,
            owner,
            persist,
        }
    }
}

impl RunStats {
    fn count(&mut self, outcome: &FrameOutcome) {
        self.frames += 1;
        match outcome {
            FrameOutcome::Ignored => self.ignored += 1,
            FrameOutcome::Malformed(_) => self.malformed += 1,
            FrameOutcome::Recorded {
                reading,
                owner,
                persist,
            } => {
                self.readings += 1;
                if !reading.status.is_normal() {
                    self.errors += 1;
                }
                if !persist.is_saved() {
                    self.persist_failures += 1;
                }
                if *owner == Transport::Backup {
                    self.backup_readings += 1;
                }
            }
        }
    }
}

fn now_stamp() -> String {
    format_timestamp(&Local::now().naive_local())
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
