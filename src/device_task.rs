use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::time::{self, Interval, MissedTickBehavior};

use tetra_protocol::transport::{self, LineReader, Transport};
use tetra_protocol::{
    AckMode, Command, DeviceId, Engine, EngineConfig, Event, PositionKind, TriggerRules,
};

use crate::automation::Profiles;
use crate::message::{DeviceCommand, DeviceEvent};

/// Interval of the optional signal and GPS polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

const SIGNAL_QUERY: &str = "AT+CSQ?";
const GPS_QUERY: &str = "AT+GPSPOS?";

/// Settings of one device task.
#[derive(Debug, Clone)]
pub struct DeviceTask {
    pub device: DeviceId,
    pub ack: AckMode,
    /// Sent once, in order, right after the task starts.
    pub startup: Vec<Command>,
    pub poll_signal: bool,
    pub poll_gps: bool,
    pub engine: EngineConfig,
    pub triggers: TriggerRules,
    pub profiles: Profiles,
}

impl DeviceTask {
    /// Run the device until it is told to quit or the terminal goes away.
    ///
    /// Reading and writing each run on a blocking thread. Decoding happens
    /// here, so a slow SDS send never holds up incoming lines.
    pub async fn run<R, W>(
        self,
        reader: LineReader<R>,
        writer: W,
        mut commands: tokio_mpsc::UnboundedReceiver<DeviceCommand>,
        events: tokio_mpsc::UnboundedSender<DeviceEvent>,
    ) where
        R: Transport + 'static,
        W: Transport + 'static,
    {
        let device = self.device;

        let (line_tx, mut lines) = tokio_mpsc::unbounded_channel();
        let reader_events = events.clone();
        tokio::task::spawn_blocking(move || read_loop(device, reader, line_tx, reader_events));

        let (write_tx, write_rx) = std_mpsc::channel();
        let writer_events = events.clone();
        tokio::task::spawn_blocking(move || write_loop(device, writer, write_rx, writer_events));
        let send = |command: Command| {
            if write_tx.send(command).is_err() {
                warn!("[{device}] writer stopped, command dropped");
            }
        };

        let (retry_tx, mut retries) = tokio_mpsc::unbounded_channel();
        let mut engine = Engine::new(device, self.engine, self.triggers, retry_tx);
        let mut kinds: HashMap<String, PositionKind> = HashMap::new();

        let _ = events.send(DeviceEvent::Connected { device });
        self.startup.into_iter().for_each(&send);

        let mut signal_poll = self.poll_signal.then(poll_timer);
        let mut gps_poll = self.poll_gps.then(poll_timer);

        loop {
            tokio::select! {
                // Queued lines are decoded before any due retry.
                biased;

                line = lines.recv() => {
                    let Some(line) = line else {
                        info!("[{device}] terminal closed");
                        break;
                    };
                    for event in engine.feed(&line) {
                        if let Event::AckRequested { to } = &event
                            && self.ack != AckMode::None
                        {
                            send(Command::Ack { dest: to.clone(), mode: self.ack });
                        }
                        if events.send(DeviceEvent::Decoded { device, event }).is_err() {
                            return;
                        }
                    }
                }
                Some(request) = retries.recv() => {
                    if !engine.accept_retry(&request) {
                        continue;
                    }
                    let kind = kinds.get(&request.issi).copied().unwrap_or(PositionKind::Lip);
                    debug!("[{device}] re-requesting position of {} (attempt {})", request.issi, request.attempt);
                    send(Command::RequestPosition { dest: request.issi, kind });
                }
                command = commands.recv() => match command {
                    Some(DeviceCommand::RequestPosition { issi, kind }) => {
                        engine.request_position(&issi);
                        kinds.insert(issi.clone(), kind);
                        send(Command::RequestPosition { dest: issi, kind });
                    }
                    Some(DeviceCommand::RunProfile(name)) => match self.profiles.commands(&name) {
                        Some(profile) => {
                            info!("[{device}] running profile {name}");
                            profile.into_iter().for_each(&send);
                        }
                        None => warn!("[{device}] unknown profile {name}"),
                    },
                    Some(DeviceCommand::Send(command)) => send(command),
                    Some(DeviceCommand::Quit) | None => break,
                },
                _ = tick(&mut signal_poll) => send(Command::Raw(SIGNAL_QUERY.to_string())),
                _ = tick(&mut gps_poll) => send(Command::Raw(GPS_QUERY.to_string())),
            }
        }

        let _ = events.send(DeviceEvent::Disconnected { device });
    }
}

fn poll_timer() -> Interval {
    let mut interval = time::interval(POLL_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Resolves on the next tick, or never if polling is off.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Hand lines to the decoder until the terminal fails or the decoder is gone.
fn read_loop<R: Transport>(
    device: DeviceId,
    mut reader: LineReader<R>,
    lines: tokio_mpsc::UnboundedSender<String>,
    events: tokio_mpsc::UnboundedSender<DeviceEvent>,
) {
    loop {
        match reader.next_line() {
            Ok(Some(line)) => {
                if lines.send(line).is_err() {
                    return;
                }
            }
            Ok(None) => {
                if lines.is_closed() {
                    return;
                }
            }
            Err(e) => {
                error!("[{device}] read failed: {e}");
                let _ = events.send(DeviceEvent::Error {
                    device,
                    message: format!("read failed: {e}"),
                });
                return;
            }
        }
    }
}

/// Write queued commands in order. A failed command is reported and the
/// next one still goes out.
fn write_loop<W: Transport>(
    device: DeviceId,
    mut writer: W,
    commands: std_mpsc::Receiver<Command>,
    events: tokio_mpsc::UnboundedSender<DeviceEvent>,
) {
    for command in commands {
        if let Err(e) = transport::send_command(&mut writer, &command) {
            error!("[{device}] {command} failed: {e}");
            let _ = events.send(DeviceEvent::Error {
                device,
                message: format!("{command}: {e}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Transport fed from a queue of lines. Reads block briefly when empty.
    #[derive(Clone, Default)]
    struct MockTerminal {
        incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
        written: Arc<Mutex<Vec<u8>>>,
        fail_writes: bool,
    }

    impl MockTerminal {
        fn push_line(&self, line: &str) {
            self.incoming
                .lock()
                .unwrap()
                .push_back(format!("{line}\r\n").into_bytes());
        }

        fn written(&self) -> String {
            String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
        }
    }

    impl Transport for MockTerminal {
        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let chunk = self.incoming.lock().unwrap().pop_front();
            let Some(chunk) = chunk else {
                std::thread::sleep(Duration::from_millis(2));
                return Ok(0);
            };
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }

        fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    fn task(ack: AckMode, profiles: Profiles) -> DeviceTask {
        DeviceTask {
            device: DeviceId(1),
            ack,
            startup: Vec::new(),
            poll_signal: false,
            poll_gps: false,
            engine: EngineConfig::default(),
            triggers: TriggerRules::default(),
            profiles,
        }
    }

    struct Running {
        terminal: MockTerminal,
        commands: tokio_mpsc::UnboundedSender<DeviceCommand>,
        events: tokio_mpsc::UnboundedReceiver<DeviceEvent>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(task: DeviceTask, terminal: MockTerminal) -> Running {
        let (cmd_tx, cmd_rx) = tokio_mpsc::unbounded_channel();
        let (event_tx, event_rx) = tokio_mpsc::unbounded_channel();
        let reader = LineReader::new(terminal.clone());
        let handle = tokio::spawn(task.run(reader, terminal.clone(), cmd_rx, event_tx));
        Running {
            terminal,
            commands: cmd_tx,
            events: event_rx,
            handle,
        }
    }

    async fn wait_for_write(terminal: &MockTerminal, needle: &str) -> bool {
        for _ in 0..200 {
            if terminal.written().contains(needle) {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn next_decoded(events: &mut tokio_mpsc::UnboundedReceiver<DeviceEvent>) -> Event {
        loop {
            let event = time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let DeviceEvent::Decoded { event, .. } = event {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_text_is_decoded_and_acknowledged() {
        let terminal = MockTerminal::default();
        terminal.push_line("+CTSDSR: 12,1234567,0,7654321,0,48");
        terminal.push_line("8200010D4869");
        let mut running = start(task(AckMode::Text, Profiles::default()), terminal);

        assert_eq!(
            running.events.recv().await,
            Some(DeviceEvent::Connected {
                device: DeviceId(1)
            })
        );
        assert!(matches!(
            next_decoded(&mut running.events).await,
            Event::Text { ref text, .. } if text == "Hi"
        ));
        assert_eq!(
            next_decoded(&mut running.events).await,
            Event::AckRequested {
                to: "1234567".to_string()
            }
        );
        assert!(wait_for_write(&running.terminal, "AT+CTSDSW=1234567,1,\"41434B\"\r\n").await);

        running.commands.send(DeviceCommand::Quit).unwrap();
        running.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_mode_none_sends_nothing() {
        let terminal = MockTerminal::default();
        terminal.push_line("+CTSDSR: 12,1234567,0,7654321,0,48");
        terminal.push_line("8200010D4869");
        let mut running = start(task(AckMode::None, Profiles::default()), terminal);

        next_decoded(&mut running.events).await;
        next_decoded(&mut running.events).await;
        running.commands.send(DeviceCommand::Quit).unwrap();
        running.handle.await.unwrap();
        assert_eq!(running.terminal.written(), "");
    }

    #[tokio::test]
    async fn test_profile_runs_every_command() {
        let profiles = Profiles::new(HashMap::from([(
            "alarm".to_string(),
            vec!["AT+CTGS=1,262".to_string(), "ATI".to_string()],
        )]));
        let running = start(task(AckMode::None, profiles), MockTerminal::default());

        running
            .commands
            .send(DeviceCommand::RunProfile("alarm".to_string()))
            .unwrap();
        running
            .commands
            .send(DeviceCommand::RunProfile("missing".to_string()))
            .unwrap();
        assert!(wait_for_write(&running.terminal, "AT+CTGS=1,262\r\nATI\r\n").await);

        running.commands.send(DeviceCommand::Quit).unwrap();
        running.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failures_are_reported() {
        let terminal = MockTerminal {
            fail_writes: true,
            ..MockTerminal::default()
        };
        let mut running = start(task(AckMode::None, Profiles::default()), terminal);
        running
            .commands
            .send(DeviceCommand::Send(Command::Raw("ATI".to_string())))
            .unwrap();

        let mut reported = false;
        while let Ok(Some(event)) = time::timeout(Duration::from_secs(2), running.events.recv()).await {
            if let DeviceEvent::Error { message, .. } = event {
                assert!(message.contains("ATI"));
                reported = true;
                break;
            }
        }
        assert!(reported);
        running.commands.send(DeviceCommand::Quit).unwrap();
        running.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_command_channel_stops_task() {
        let mut running = start(task(AckMode::None, Profiles::default()), MockTerminal::default());
        drop(running.commands);
        running.handle.await.unwrap();
        let mut last = None;
        while let Some(event) = running.events.recv().await {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(DeviceEvent::Disconnected {
                device: DeviceId(1)
            })
        );
    }
}
