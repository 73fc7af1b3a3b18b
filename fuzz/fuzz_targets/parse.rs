#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = unkindle::mobi::MobiBook::parse(data);
    let _ = unkindle::topaz::TopazBook::parse(data);
});
