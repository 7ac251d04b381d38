use velos::Result;

fn main() -> Result<()> {
    velos::logger::init();
    handle_epipe();
    velos::cli::run()
}

/// Writes to a client socket that hung up must surface as EPIPE errors,
/// not kill the daemon.
fn handle_epipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
