use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;

use lendline_ledger::{InMemoryLedger, LedgerState};

/// Open the simulated ledger persisted at `path`, or a fresh one.
pub fn open_ledger(path: &Path) -> anyhow::Result<InMemoryLedger> {
    match fs::read(path) {
        Ok(bytes) => {
            let state: LedgerState = serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt ledger state {}", path.display()))?;
            Ok(InMemoryLedger::from_state(state))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(InMemoryLedger::new()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Persist the ledger's finalized state to `path`.
pub fn save_ledger(path: &Path, ledger: &InMemoryLedger) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(&ledger.export_state())?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
