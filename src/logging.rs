//! stderr + ログファイルへの行ログ

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

type LogFile = Arc<Mutex<BufWriter<File>>>;

/// コンポーネント間で共有するロガー
#[derive(Clone, Default)]
pub struct Logger {
    file: Option<LogFile>,
    verbose: bool,
}

impl Logger {
    /// stderr のみに出力
    pub fn stderr() -> Self {
        Self::default()
    }

    /// `dir/<prefix>_<日時>.log` を作って出力先に加える
    pub fn open<P: AsRef<Path>>(dir: P, prefix: &str, verbose: bool) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log dir {}", dir.display()))?;
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.log", prefix, ts));
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        eprintln!("Log: {}", path.display());
        Ok(Self {
            file: Some(Arc::new(Mutex::new(BufWriter::new(file)))),
            verbose,
        })
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn write_line(&self, msg: &str) {
        eprintln!("{}", msg);
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{}", msg);
                let _ = f.flush();
            }
        }
    }
}

#[macro_export]
macro_rules! log {
    ($logger:expr, $($arg:tt)*) => {{
        $logger.write_line(&format!($($arg)*));
    }};
}

/// verbose 時のみ出力
#[macro_export]
macro_rules! vlog {
    ($logger:expr, $($arg:tt)*) => {{
        if $logger.verbose() {
            $logger.write_line(&format!($($arg)*));
        }
    }};
}
