#![no_main]

use beardown::audio::{MediaSink, NullSink, PlayTicket, SinkEvent};
use beardown::model::{Catalog, Track};
use beardown::sequencer::Sequencer;
use libfuzzer_sys::fuzz_target;
use url::Url;

fuzz_target!(|data: &[u8]| {
    let Ok(base) = Url::parse("http://127.0.0.1:8443") else {
        return;
    };
    let len = data.first().map_or(0, |byte| usize::from(*byte % 16));
    let catalog = Catalog::new(
        "/fuzz",
        (0..len)
            .map(|idx| Track::new(format!("dir/track {idx}.mp3"), idx as u64))
            .collect(),
    );

    let mut sink = NullSink::new();
    let mut sequencer = Sequencer::new(false);
    sequencer.initialize(base, catalog);

    for byte in data.iter().skip(1) {
        match byte % 6 {
            0 => sequencer.select_index(usize::from(byte / 6), &mut sink),
            1 => sequencer.toggle_autoplay(),
            2 => sequencer.on_track_finished(&mut sink),
            3 => sequencer.on_track_error("fuzz", &mut sink),
            4 => {
                let ticket = sink.current_ticket().unwrap_or(PlayTicket(u64::from(*byte)));
                sequencer.handle_sink_event(SinkEvent::Finished { ticket }, &mut sink);
            }
            _ => sink.stop(),
        }

        if let Some(index) = sequencer.current_index() {
            assert!(index < len);
        }
        let _ = sequencer.take_notices();
    }
});
