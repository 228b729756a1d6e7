use std::io;
use std::sync::mpsc::Sender;
#[cfg(unix)]
use std::thread;

#[cfg(unix)]
use crossterm::terminal::size as terminal_size;
#[cfg(unix)]
use signal_hook::consts::signal::SIGWINCH;
#[cfg(unix)]
use signal_hook::iterator::Signals;

/// Reports the local terminal's `(rows, cols)` whenever it changes.
pub struct ResizeWatcher {
    #[cfg(unix)]
    handle: signal_hook::iterator::Handle,
    #[cfg(unix)]
    thread: thread::JoinHandle<()>,
}

impl ResizeWatcher {
    /// Start watching; `None` on platforms without a resize signal.
    #[cfg(unix)]
    pub fn start(sizes: Sender<(u16, u16)>) -> io::Result<Option<Self>> {
        let mut signals = Signals::new([SIGWINCH])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("resize-watcher".to_string())
            .spawn(move || {
                for _ in signals.forever() {
                    let (cols, rows) = match terminal_size() {
                        Ok(size) => size,
                        Err(_) => continue,
                    };
                    if sizes.send((rows, cols)).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Some(Self { handle, thread }))
    }

    #[cfg(not(unix))]
    pub fn start(sizes: Sender<(u16, u16)>) -> io::Result<Option<Self>> {
        drop(sizes);
        Ok(None)
    }

    pub fn stop(self) {
        #[cfg(unix)]
        {
            self.handle.close();
            let _ = self.thread.join();
        }
    }
}
