#![no_main]

use libfuzzer_sys::fuzz_target;
use scatterweb::buffer::Buffer;
use scatterweb::http::RequestParser;

fuzz_target!(|data: &[u8]| {
    let mut buf = Buffer::with_capacity(data.len().max(1));
    buf.append(data);
    let mut parser = RequestParser::new();
    let _ = parser.parse(&mut buf);
});
