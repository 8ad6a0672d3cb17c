/// Percentage of `declared` covered by `moved`. An empty file counts as complete.
pub fn percent_complete(moved: u64, declared: u64) -> f64 {
    if declared == 0 {
        return 100.0;
    }
    moved as f64 / declared as f64 * 100.0
}

/// Receives a notification after every chunk. Never influences the protocol.
pub trait ProgressReporter {
    fn report(&mut self, filename: &str, moved: u64, declared: u64);
}

impl<F> ProgressReporter for F
where
    F: FnMut(&str, u64, u64),
{
    fn report(&mut self, filename: &str, moved: u64, declared: u64) {
        self(filename, moved, declared)
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _filename: &str, _moved: u64, _declared: u64) {}
}

/// Logs every chunk at debug level and each 10% step at info level.
#[derive(Default)]
pub struct LogProgress {
    current_file: String,
    last_decile: u8,
}

impl ProgressReporter for LogProgress {
    fn report(&mut self, filename: &str, moved: u64, declared: u64) {
        if self.current_file != filename {
            self.current_file = filename.to_string();
            self.last_decile = 0;
        }

        let percent = percent_complete(moved, declared);
        log::debug!("{}: {:.1}% ({}/{} bytes)", filename, percent, moved, declared);

        let decile = (percent / 10.0).floor().min(10.0) as u8;
        if decile > self.last_decile {
            self.last_decile = decile;
            log::info!("{}: {:.1}%", filename, percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_empty_file_is_complete() {
        assert_eq!(percent_complete(0, 0), 100.0);
    }

    #[test]
    fn percent_of_partial_transfer() {
        assert_eq!(format!("{:.1}", percent_complete(32, 1024)), "3.1");
        assert_eq!(format!("{:.1}", percent_complete(96, 1024)), "9.4");
        assert_eq!(percent_complete(500, 1000), 50.0);
        assert_eq!(percent_complete(1024, 1024), 100.0);
    }

    #[test]
    fn closures_act_as_reporters() {
        let mut seen = Vec::new();
        {
            let mut reporter = |_: &str, moved: u64, declared: u64| seen.push((moved, declared));
            reporter.report("a.txt", 1, 2);
            reporter.report("a.txt", 2, 2);
        }
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn log_progress_resets_between_files() {
        let mut progress = LogProgress::default();
        progress.report("a.txt", 10, 10);
        assert_eq!(progress.last_decile, 10);
        progress.report("b.txt", 1, 10);
        assert_eq!(progress.current_file, "b.txt");
        assert_eq!(progress.last_decile, 1);
    }
}
