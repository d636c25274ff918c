//! Indicatif progress bars driven by transfer events.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rescache::{TransferEvent, TransferEventKind, TransferListener};

/// Renders one progress bar per in-flight destination.
pub struct ProgressReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<PathBuf, ProgressBar>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        ProgressReporter {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar_for(&self, event: &TransferEvent) -> ProgressBar {
        let mut bars = match self.bars.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        bars.entry(event.dest.clone())
            .or_insert_with(|| {
                let bar = match event.total {
                    Some(total) => {
                        let bar = self.multi.add(ProgressBar::new(total));
                        bar.set_style(
                            ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes}")
                                .unwrap_or_else(|_| ProgressStyle::default_bar()),
                        );
                        bar
                    }
                    None => self.multi.add(ProgressBar::new_spinner()),
                };
                bar.set_message(event.display_name());
                bar
            })
            .clone()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        ProgressReporter::new()
    }
}

impl TransferListener for ProgressReporter {
    fn on_event(&self, event: &TransferEvent) {
        let bar = self.bar_for(event);
        match event.kind {
            TransferEventKind::Started => {}
            TransferEventKind::Updated => {
                if let Some(total) = event.total {
                    bar.set_length(total);
                }
                bar.set_position(event.transferred);
            }
            TransferEventKind::Completed => {
                bar.set_length(event.transferred);
                bar.set_position(event.transferred);
                bar.finish();
                let mut bars = match self.bars.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                bars.remove(&event.dest);
            }
        }
    }
}
