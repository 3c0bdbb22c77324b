//! Predicate and type IRI constants (spec §6 "Predicate set", ADDED full
//! table, grounded on pyaff4 `lexicon.py`).
//!
//! New containers are always written against the `standard`/`standard11`
//! namespace. The `legacy` and `scudette` constants exist purely so the
//! resolver's dialect-aware lookups (§4.2 ADDED note) can recognize
//! triples produced by older or alternate implementations on read.

pub const AFF4_NAMESPACE: &str = "http://aff4.org/Schema#";
pub const AFF4_LEGACY_NAMESPACE: &str = "http://afflib.org/2009/aff4#";
pub const RDF_NAMESPACE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

pub const AFF4_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const AFF4_STORED: &str = "http://aff4.org/Schema#stored";
pub const AFF4_CONTAINS: &str = "http://aff4.org/Schema#contains";
pub const AFF4_DATASTREAM: &str = "http://aff4.org/Schema#dataStream";
pub const AFF4_TARGET: &str = "http://aff4.org/Schema#target";

pub const AFF4_STREAM_SIZE: &str = "http://aff4.org/Schema#size";
pub const AFF4_LEGACY_STREAM_SIZE: &str = "http://afflib.org/2009/aff4#size";

pub const AFF4_STREAM_ORIGINAL_FILENAME: &str = "http://aff4.org/Schema#original_filename";
pub const AFF4_PATH_NAME: &str = "http://aff4.org/Schema#originalFileName";

pub const AFF4_ZIP_TYPE: &str = "http://aff4.org/Schema#zip_volume";
pub const AFF4_ZIP_SEGMENT_TYPE: &str = "http://aff4.org/Schema#zip_segment";
pub const AFF4_ZIP_SEGMENT_IMAGE_TYPE: &str = "http://aff4.org/Schema#ZipSegment";
pub const AFF4_FILEIMAGE: &str = "http://aff4.org/Schema#FileImage";

pub const AFF4_IMAGE_TYPE: &str = "http://aff4.org/Schema#ImageStream";
pub const AFF4_LEGACY_IMAGE_TYPE: &str = "http://afflib.org/2009/aff4#stream";
pub const AFF4_SCUDETTE_IMAGE_TYPE: &str = "http://aff4.org/Schema#image";
pub const AFF4_IMAGE_CHUNK_SIZE: &str = "http://aff4.org/Schema#chunkSize";
pub const AFF4_LEGACY_IMAGE_CHUNK_SIZE: &str = "http://afflib.org/2009/aff4#chunkSize";
pub const AFF4_IMAGE_CHUNKS_PER_SEGMENT: &str = "http://aff4.org/Schema#chunksInSegment";
pub const AFF4_LEGACY_IMAGE_CHUNKS_PER_SEGMENT: &str = "http://afflib.org/2009/aff4#chunksInSegment";
pub const AFF4_IMAGE_COMPRESSION: &str = "http://aff4.org/Schema#compressionMethod";
pub const AFF4_LEGACY_IMAGE_COMPRESSION: &str = "http://afflib.org/2009/aff4#CompressionMethod";

pub const AFF4_IMAGE_COMPRESSION_ZLIB: &str = "https://www.ietf.org/rfc/rfc1950.txt";
pub const AFF4_IMAGE_COMPRESSION_SNAPPY: &str = "http://code.google.com/p/snappy/";
pub const AFF4_IMAGE_COMPRESSION_SNAPPY_SCUDETTE: &str = "https://github.com/google/snappy";
pub const AFF4_IMAGE_COMPRESSION_LZ4: &str = "https://code.google.com/p/lz4/";
pub const AFF4_IMAGE_COMPRESSION_STORED: &str = "http://aff4.org/Schema#compression/stored";
pub const AFF4_IMAGE_COMPRESSION_NONE: &str = "http://aff4.org/Schema#NullCompressor";
pub const AFF4_IMAGE_AES_XTS: &str = "https://doi.org/10.1109/IEEESTD.2008.4493450";

pub const AFF4_MAP_TYPE: &str = "http://aff4.org/Schema#Map";
pub const AFF4_LEGACY_MAP_TYPE: &str = "http://afflib.org/2009/aff4#map";
pub const AFF4_SCUDETTE_MAP_TYPE: &str = "http://aff4.org/Schema#map";

pub const AFF4_ENCRYPTEDSTREAM_TYPE: &str = "http://aff4.org/Schema#EncryptedStream";
pub const AFF4_RANDOMSTREAM_TYPE: &str = "http://aff4.org/Schema#RandomAccessImageStream";
pub const AFF4_KEYBAG: &str = "http://aff4.org/Schema#keyBag";
pub const AFF4_WRAPPEDKEY: &str = "http://aff4.org/Schema#wrappedKey";
pub const AFF4_SALT: &str = "http://aff4.org/Schema#salt";
pub const AFF4_ITERATIONS: &str = "http://aff4.org/Schema#iterations";
pub const AFF4_KEYSIZEBYTES: &str = "http://aff4.org/Schema#keySizeInBytes";
pub const AFF4_CERT_ENCRYPTED_KEYBAG: &str = "http://aff4.org/Schema#PublicKeyEncryptedKeyBag";
pub const AFF4_PASSWORD_WRAPPED_KEYBAG: &str = "http://aff4.org/Schema#PasswordWrappedKeyBag";
pub const AFF4_SERIALNUMBER: &str = "http://aff4.org/Schema#serialNumber";
pub const AFF4_SUBJECTNAME: &str = "http://aff4.org/Schema#x509SubjectName";

pub const AFF4_LAST_WRITTEN: &str = "http://aff4.org/Schema#lastWritten";
pub const AFF4_LAST_ACCESSED: &str = "http://aff4.org/Schema#lastAccessed";
pub const AFF4_RECORD_CHANGED: &str = "http://aff4.org/Schema#recordChanged";
pub const AFF4_BIRTH_TIME: &str = "http://aff4.org/Schema#birthTime";

pub const AFF4_HASH: &str = "http://aff4.org/Schema#hash";
pub const AFF4_BLOCK_MAP_HASH: &str = "http://aff4.org/Schema#blockMapHash";
pub const AFF4_BLOCK_HASHES_HASH: &str = "http://aff4.org/Schema#blockHashesHash";

pub const HASH_SHA512: &str = "http://aff4.org/Schema#SHA512";
pub const HASH_SHA256: &str = "http://aff4.org/Schema#SHA256";
pub const HASH_SHA1: &str = "http://aff4.org/Schema#SHA1";
pub const HASH_MD5: &str = "http://aff4.org/Schema#MD5";
pub const HASH_BLAKE2B: &str = "http://aff4.org/Schema#Blake2b";
pub const HASH_BLOCKMAPHASH_SHA512: &str = "http://aff4.org/Schema#blockMapHashSHA512";

/// Well-known symbolic-stream URNs (spec GLOSSARY "symbolic"): boundless,
/// virtual streams that never have archive members of their own.
pub const SYMBOLIC_ZERO_URN: &str = "aff4://Zero";
pub const SYMBOLIC_UNKNOWN_URN: &str = "aff4://UnknownData";
pub const SYMBOLIC_UNKNOWN_FILL: &[u8] = b"UNKNOWN";

/// Recognizes a `aff4://SymbolicStreamXX`-style URN naming a constant fill
/// byte, and returns that byte. `XX` is two uppercase hex digits.
pub fn symbolic_stream_fill_byte(urn: &str) -> Option<u8> {
    let suffix = urn.strip_prefix("aff4://SymbolicStream")?;
    u8::from_str_radix(suffix, 16).ok()
}

/// Predicates/types never written to `information.turtle` (spec §4.1
/// ADDED: `_should_ignore` filters these implied facts so they don't
/// conflict with facts re-derived from archive shape on reload).
pub fn is_implied_fact(predicate: &str, object: &str) -> bool {
    predicate == AFF4_TYPE && (object == AFF4_ZIP_SEGMENT_TYPE || object == AFF4_ZIP_TYPE)
}

/// Recognizes any dialect's spelling of the "this is a map stream" type
/// triple (spec §4.2 ADDED note).
pub fn is_map_type(object: &str) -> bool {
    matches!(object, AFF4_MAP_TYPE | AFF4_LEGACY_MAP_TYPE | AFF4_SCUDETTE_MAP_TYPE)
}

/// Recognizes any dialect's spelling of the "this is an image stream" type
/// triple.
pub fn is_image_type(object: &str) -> bool {
    matches!(object, AFF4_IMAGE_TYPE | AFF4_LEGACY_IMAGE_TYPE | AFF4_SCUDETTE_IMAGE_TYPE)
}

/// Recognizes any known snappy compression IRI (the Scudette dialect wrote
/// an alternate one). The encoder always writes
/// [`AFF4_IMAGE_COMPRESSION_SNAPPY`].
pub fn is_snappy(object: &str) -> bool {
    matches!(object, AFF4_IMAGE_COMPRESSION_SNAPPY | AFF4_IMAGE_COMPRESSION_SNAPPY_SCUDETTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implied_facts_filtered() {
        assert!(is_implied_fact(AFF4_TYPE, AFF4_ZIP_SEGMENT_TYPE));
        assert!(is_implied_fact(AFF4_TYPE, AFF4_ZIP_TYPE));
        assert!(!is_implied_fact(AFF4_TYPE, AFF4_MAP_TYPE));
    }

    #[test]
    fn map_type_recognizes_all_dialects() {
        assert!(is_map_type(AFF4_MAP_TYPE));
        assert!(is_map_type(AFF4_LEGACY_MAP_TYPE));
        assert!(is_map_type(AFF4_SCUDETTE_MAP_TYPE));
        assert!(!is_map_type(AFF4_IMAGE_TYPE));
    }

    #[test]
    fn snappy_recognizes_both_iris() {
        assert!(is_snappy(AFF4_IMAGE_COMPRESSION_SNAPPY));
        assert!(is_snappy(AFF4_IMAGE_COMPRESSION_SNAPPY_SCUDETTE));
        assert!(!is_snappy(AFF4_IMAGE_COMPRESSION_LZ4));
    }
}
