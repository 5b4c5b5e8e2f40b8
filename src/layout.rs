//! Artifact key layout shared by every stage.
//!
//! ```text
//! upload/{ref}/{file_name}                    source document
//! images/{ref}/page_{n}.png                   one per rendered page
//! download/{ref}/formatted_output.txt         extracted text
//! download/{ref}/chunk_{i}_{job}.{ext}        one per speech chunk
//! download/{ref}/combined_audio_info.txt      manifest of chunk keys
//! download/{ref}/Audio.{ext}                  final audio (single chunk)
//! download/{ref}/Audio.manifest               final manifest (many chunks)
//! ```
//!
//! Page keys are not zero-padded, so `page_10.png` sorts before
//! `page_2.png`. Consumers recover the order with [`parse_page_number`].

const UPLOAD: &str = "upload";
const IMAGES: &str = "images";
const DOWNLOAD: &str = "download";
const TEXT_FILE: &str = "formatted_output.txt";
const MANIFEST_FILE: &str = "combined_audio_info.txt";

pub fn upload_key(reference_key: &str, file_name: &str) -> String {
    format!("{UPLOAD}/{reference_key}/{file_name}")
}

pub fn images_prefix(reference_key: &str) -> String {
    format!("{IMAGES}/{reference_key}/")
}

pub fn page_image_key(reference_key: &str, page: u32) -> String {
    format!("{IMAGES}/{reference_key}/page_{page}.png")
}

/// Extract the page number from a page-image key.
pub fn parse_page_number(key: &str) -> Option<u32> {
    let file = key.rsplit('/').next()?;
    file.strip_prefix("page_")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

pub fn download_prefix(reference_key: &str) -> String {
    format!("{DOWNLOAD}/{reference_key}/")
}

pub fn text_key(reference_key: &str) -> String {
    format!("{DOWNLOAD}/{reference_key}/{TEXT_FILE}")
}

/// Return the reference key if `key` is an extracted-text key.
pub fn parse_text_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(DOWNLOAD)?.strip_prefix('/')?;
    let reference_key = rest.strip_suffix(TEXT_FILE)?.strip_suffix('/')?;
    if reference_key.is_empty() || reference_key.contains('/') {
        None
    } else {
        Some(reference_key)
    }
}

/// Prefix under which a synthesis job writes its output for chunk `index`.
pub fn chunk_prefix(reference_key: &str, index: usize) -> String {
    format!("{DOWNLOAD}/{reference_key}/chunk_{index}_")
}

pub fn manifest_key(reference_key: &str) -> String {
    format!("{DOWNLOAD}/{reference_key}/{MANIFEST_FILE}")
}

/// Final artifact when the text fit in one speech chunk.
///
/// There are two final keys, not one: chunked audio is never concatenated,
/// so a many-chunk task ends in [`final_manifest_key`] instead. Exactly one
/// of the two exists for a finished task. The synthesis handoff names it;
/// readers without the handoff try this key first, then the manifest.
pub fn final_audio_key(reference_key: &str, extension: &str) -> String {
    format!("{DOWNLOAD}/{reference_key}/Audio.{extension}")
}

/// Final artifact when the text needed several speech chunks: the chunk
/// keys, one per line, in narration order.
pub fn final_manifest_key(reference_key: &str) -> String {
    format!("{DOWNLOAD}/{reference_key}/Audio.manifest")
}
