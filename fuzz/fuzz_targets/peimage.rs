#![no_main]

use gpuhint::{
    patcher::{self, PatchOptions},
    PeImage,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut image) = PeImage::from_mem(data.to_vec()) else {
        return;
    };
    let options = PatchOptions::default();
    if patcher::query(&image, &options).is_ok() && patcher::apply(&mut image, &options, 1).is_ok() {
        let _ = image.serialize();
    }
});
