#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Frames are decoded straight off a socket, so arbitrary bytes must only
    // ever produce an error or a frame, never a panic
    let mut buf = BytesMut::from(data);

    while let Ok(Some(frame)) = tether_wire::Frame::decode(&mut buf) {
        // A frame that passed its checksum may still hold garbage
        if let Ok(request) = tether_wire::Request::from_frame(&frame) {
            let reencoded = request.to_frame().expect("decoded request re-encodes");
            let again = tether_wire::Request::from_frame(&reencoded).expect("re-encoded request decodes");
            assert_eq!(again, request);
        }
        let _response = tether_wire::Response::from_frame(&frame);
    }

    let mut header_buf = data;
    if let Ok(header) = tether_wire::FrameHeader::decode(&mut header_buf) {
        let _ = header.validate();
    }
});
