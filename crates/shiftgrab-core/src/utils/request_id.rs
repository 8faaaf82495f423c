use rand::Rng;

/// Alphabet used by the web client for `x-atoz-client-request-id`.
const ID_ALPHABET: &[u8] = b"ModuleSymbhasOwnPr-0123456789ABCDEFGHNRVfgctiUvz_KqYTJkLxpZXIjQW";

/// Length of ids generated by the web client.
const ID_LENGTH: usize = 21;

/// Generate a fresh, URL-safe request id.
pub fn request_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_shape() {
        let id = request_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_request_ids_differ() {
        assert_ne!(request_id(), request_id());
    }
}
