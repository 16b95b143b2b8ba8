#![no_main]

use iqstream_transport::meta::StreamMetadata;
use iqstream_transport::wire::{BlockHeader, SuperBlock};
use libfuzzer_sys::fuzz_target;

/// The parsers must never panic; they only return None for invalid data.
fuzz_target!(|data: &[u8]| {
    let _ = BlockHeader::decode(&mut &data[..]);

    if let Some(sb) = SuperBlock::parse(data) {
        let _ = sb.metadata();
        let _ = sb.samples().count();

        // Header must survive re-encoding.
        let mut buf = bytes::BytesMut::new();
        sb.header.encode(&mut buf);
        assert_eq!(BlockHeader::decode(&mut &buf[..]), Some(sb.header));
    }

    if let Some(meta) = StreamMetadata::decode(&mut &data[..]) {
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        let again = StreamMetadata::decode(&mut &buf[..]).unwrap();
        assert_eq!(again, meta);
        assert_eq!(again.timestamp_us(), meta.timestamp_us());
    }
});
