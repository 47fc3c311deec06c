#![no_main]
use libfuzzer_sys::fuzz_target;
use rewall_tls::codec::Reader;
use rewall_tls::extensions::ExtensionList;

fuzz_target!(|data: &[u8]| {
    let mut reader = Reader::new(data);
    if let Ok(list) = ExtensionList::unmarshal(&mut reader) {
        let _ = list.marshal();
    }
});
