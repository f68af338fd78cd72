//! ---
//! ecc_section: "05-registry-and-commands"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Registry mirror and command dispatch."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// How a client command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Undelivered,
}

impl CommandOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOutcome::Succeeded => "succeeded",
            CommandOutcome::Failed => "failed",
            CommandOutcome::TimedOut => "timed_out",
            CommandOutcome::Undelivered => "undelivered",
        }
    }
}

/// Gauges over the registry mirror and counters for command outcomes.
#[derive(Clone)]
pub struct RegistryMetrics {
    known: IntGauge,
    online: IntGauge,
    commands: IntCounterVec,
}

impl RegistryMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let known = IntGauge::with_opts(Opts::new(
            "ecc_registry_known_services",
            "Services present in the registry mirror",
        ))?;
        let online = IntGauge::with_opts(Opts::new(
            "ecc_registry_online_services",
            "Services whose last heartbeat is within the online threshold",
        ))?;
        let commands = IntCounterVec::new(
            Opts::new("ecc_commands_total", "Control commands issued, by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(known.clone()))?;
        registry.register(Box::new(online.clone()))?;
        registry.register(Box::new(commands.clone()))?;

        Ok(Self {
            known,
            online,
            commands,
        })
    }

    pub fn set_known(&self, count: usize) {
        self.known.set(count as i64);
    }

    pub fn set_online(&self, count: usize) {
        self.online.set(count as i64);
    }

    pub fn observe_command(&self, outcome: CommandOutcome) {
        self.commands.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn command_count(&self, outcome: CommandOutcome) -> u64 {
        self.commands.with_label_values(&[outcome.as_str()]).get()
    }
}
