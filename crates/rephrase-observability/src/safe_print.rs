// Best-effort stderr logging that never panics.
//
// `eprintln!` panics when stderr is closed (detached from a terminal under some
// supervisors); the trace writer and panic hook must not.

#[macro_export]
macro_rules! safe_eprintln {
    ($($arg:tt)*) => {{
        use std::io::Write;
        let _ = writeln!(std::io::stderr(), $($arg)*);
    }};
}
