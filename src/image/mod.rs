pub mod consts;
pub mod store;

pub mod prelude {
    pub use super::consts::*;
    pub use super::store::ImageStore;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    fn with_image<F: FnOnce(ImageStore)>(name: &str, callback: F) {
        let path = std::env::temp_dir().join(format!(".smartcard-fs-test-{name}"));

        let _ = std::fs::remove_file(&path);

        let store = ImageStore::open(&path).expect("failed to open backing image");

        callback(store);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn fresh_image_is_blank() {
        with_image("fresh", |mut store| {
            assert_eq!(store.root_pointer(), C_NULL);
            assert_eq!(store.write_cursor(), 0);
            assert_eq!(store.read_cursor(), 0);
            assert_eq!(store.read_u8(100).unwrap(), 0xFF);
        });
    }

    #[test]
    fn allocate_advances_and_persists_cursor() {
        with_image("allocate", |mut store| {
            let first = store.allocate(10).unwrap();

            assert_eq!(first, 0);
            assert_eq!(store.write_cursor(), 10);

            let second = store.allocate(20).unwrap();

            assert_eq!(second, 10);
            assert_eq!(store.write_cursor(), 30);
        });
    }

    #[test]
    fn allocate_fails_past_cursor_region() {
        with_image("allocate-oob", |mut store| {
            assert!(store.allocate(u16::MAX).is_err());
        });
    }

    #[test]
    fn reopen_preserves_cursor_and_root_pointer() {
        let path = std::env::temp_dir().join(".smartcard-fs-test-reopen");

        let _ = std::fs::remove_file(&path);

        {
            let mut store = ImageStore::open(&path).unwrap();

            store.allocate(42).unwrap();
            store.set_root_pointer(MF_OFFSET);
        }

        {
            let mut store = ImageStore::open(&path).unwrap();

            assert_eq!(store.write_cursor(), 42);
            assert_eq!(store.root_pointer(), MF_OFFSET);
        }

        let _ = std::fs::remove_file(&path);
    }
}
