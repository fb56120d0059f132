use std::io::BufRead;

use log::{debug, info};
use tokio::sync::mpsc;

use tetra_protocol::transport;
use tetra_protocol::{DeviceId, Engine, EngineConfig, Event, TriggerRules};

/// Decode a captured terminal log offline.
///
/// Lines are decoded as Latin-1 like live terminal input and go through a
/// fresh engine, the same way a live device would see them. Nothing is
/// transmitted. Retry requests the engine would send are logged and dropped.
pub fn replay<R: BufRead>(
    device: DeviceId,
    config: EngineConfig,
    triggers: TriggerRules,
    mut input: R,
) -> std::io::Result<Vec<Event>> {
    let (retry_tx, mut retries) = mpsc::unbounded_channel();
    let mut engine = Engine::new(device, config, triggers, retry_tx);
    let mut events = Vec::new();

    let mut raw = Vec::new();
    let mut number = 0;
    loop {
        raw.clear();
        if input.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        number += 1;
        let line = transport::decode_line(&raw);
        let decoded = engine.feed(&line);
        for event in &decoded {
            debug!("line {number}: {event:?}");
        }
        events.extend(decoded);
        while let Ok(request) = retries.try_recv() {
            info!(
                "would re-request position of {} (attempt {})",
                request.issi, request.attempt
            );
        }
    }

    Ok(events)
}
