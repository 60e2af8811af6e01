use std::{
    io::Write,
    sync::mpsc,
    thread,
    time::Duration,
};

use log::debug;

/// Writes a line to its output every tick until stopped. Stopping sends on the stop channel and
/// then joins the thread, which is the acknowledgement that it is gone. Dropping stops it too.
pub struct Progress {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Progress {
    pub fn start<W>(message: &str, tick: Duration, mut output: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let message = message.to_owned();
        let thread = thread::spawn(move || loop {
            match stopped.recv_timeout(tick) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // The reader may have gone away, there is nobody to tell.
                    let _ = writeln!(output, "{message}").and_then(|()| output.flush());
                }
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        });

        Self {
            stop: Some(stop),
            thread: Some(thread),
        }
    }

    /// Starts reporting to standard output, which the pushing client sees as remote output.
    pub fn stdout(message: &str, tick: Duration) -> Self {
        Self::start(message, tick, std::io::stdout())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("progress reporter panicked");
            }
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    pub(crate) struct SharedOutput(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedOutput {
        pub(crate) fn lines(&self) -> usize {
            self.0.lock().unwrap().iter().filter(|&&byte| byte == b'\n').count()
        }
    }

    #[test]
    fn reports_until_stopped() {
        let output = SharedOutput::default();
        let progress = Progress::start("...", Duration::from_millis(10), output.clone());
        thread::sleep(Duration::from_millis(100));
        progress.stop();

        let lines = output.lines();
        assert!(lines >= 2, "expected a few ticks, got {lines}");

        // Nothing is written after the stop was acknowledged.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(output.lines(), lines);
        assert!(String::from_utf8(output.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .all(|line| line == "..."));
    }

    #[test]
    fn dropping_stops_the_reporter() {
        let output = SharedOutput::default();
        {
            let _progress = Progress::start("...", Duration::from_millis(5), output.clone());
            thread::sleep(Duration::from_millis(30));
        }
        let lines = output.lines();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(output.lines(), lines);
    }
}
