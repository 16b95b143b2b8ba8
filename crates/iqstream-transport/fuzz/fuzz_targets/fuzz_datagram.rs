#![no_main]

use iqstream_transport::buffer::PlayoutBuffer;
use iqstream_transport::wire::UDP_SIZE;
use libfuzzer_sys::fuzz_target;

/// Feed arbitrary datagrams into the playout buffer.
///
/// Exercises frame synchronization, slot routing, metadata changes and the
/// erasure decoder on garbage recovery blocks. The buffer must never panic.
fuzz_target!(|data: &[u8]| {
    let mut buffer = PlayoutBuffer::new(4);

    // Whole input as one datagram (almost always the wrong size).
    buffer.write_datagram(data);

    // Then as a sequence of datagrams, reading in between.
    for chunk in data.chunks(UDP_SIZE) {
        buffer.write_datagram(chunk);
        let _ = buffer.read(chunk.len());
    }
    let _ = buffer.timing_report();
});
