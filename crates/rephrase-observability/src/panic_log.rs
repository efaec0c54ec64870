use std::{fs::OpenOptions, io::Write, path::Path};

use crate::now_ms;

// The default hook prints to stderr only, which is lost when the daemon runs
// under a supervisor without a journal. Keep a copy in the data dir.
pub fn install_best_effort(data_dir: &Path) {
    let dir = data_dir.to_path_buf();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let bt = std::backtrace::Backtrace::force_capture();
        let msg = format!("ts_ms={}\npanic={info}\nbacktrace={bt}\n---\n", now_ms());

        let _ = std::fs::create_dir_all(&dir);
        if let Ok(mut f) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("panic.log"))
        {
            let _ = f.write_all(msg.as_bytes());
        }
        default_hook(info);
    }));
}
