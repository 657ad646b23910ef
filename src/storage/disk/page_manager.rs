use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use log::trace;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random-access page I/O over one table file.
///
/// The file is an array of `page_size` byte pages; page `n` starts at byte
/// `n * page_size`. The page size is fixed when the manager is built.
pub struct PageManager {
    file: Mutex<File>,
    path: PathBuf,
    page_size: usize,
}

impl PageManager {
    pub fn create(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self::with_file(file, path, page_size))
    }

    pub fn open(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let manager = Self::with_file(file, path, page_size);

        let len = manager.file.lock().metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "{:?} is {} bytes, not a whole number of {} byte pages",
                path, len, page_size
            )));
        }
        Ok(manager)
    }

    fn with_file(file: File, path: &Path, page_size: usize) -> Self {
        Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            page_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        self.check_buffer(buf.len())?;

        let mut file = self.file.lock();
        let page_count = Self::count(&file, self.page_size)?;
        if page_id.page_no >= page_count {
            return Err(StorageError::PageOutOfRange {
                page_id,
                page_count,
            });
        }

        file.seek(SeekFrom::Start(self.page_offset(page_id)))?;
        file.read_exact(buf)?;
        trace!("read {} from {:?}", page_id, self.path);

        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        self.check_buffer(data.len())?;

        let offset = self.page_offset(page_id);
        let mut file = self.file.lock();
        let file_size = file.metadata()?.len();

        // Extend file if necessary
        if offset >= file_size {
            file.set_len(offset + self.page_size as u64)?;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_all()?;
        trace!("wrote {} to {:?}", page_id, self.path);

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file = self.file.lock();
        Self::count(&file, self.page_size)
    }

    /// Appends one zero-filled page and returns its page number. Appends are
    /// serialized on the file lock, so concurrent callers get distinct numbers.
    pub fn allocate_page(&self) -> StorageResult<u32> {
        let file = self.file.lock();
        let page_no = Self::count(&file, self.page_size)?;

        file.set_len((page_no as u64 + 1) * self.page_size as u64)?;
        file.sync_all()?;

        Ok(page_no)
    }

    fn count(file: &File, page_size: usize) -> StorageResult<u32> {
        Ok((file.metadata()?.len() / page_size as u64) as u32)
    }

    fn check_buffer(&self, len: usize) -> StorageResult<()> {
        if len != self.page_size {
            return Err(StorageError::InvalidArgument(format!(
                "buffer must be {} bytes, got {}",
                self.page_size, len
            )));
        }
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        page_id.page_no as u64 * self.page_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::TableId;
    use anyhow::Result;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 4096;

    fn pid(page_no: u32) -> PageId {
        PageId::new(TableId(1), page_no)
    }

    #[test]
    fn test_create_and_open() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.tbl");

        {
            let pm = PageManager::create(&file_path, PAGE_SIZE)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        {
            let pm = PageManager::open(&file_path, PAGE_SIZE)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.tbl"), PAGE_SIZE)?;

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 42;
        write_buf[PAGE_SIZE - 1] = 24;
        pm.write_page(pid(0), &write_buf)?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        pm.read_page(pid(0), &mut read_buf)?;

        assert_eq!(read_buf[0], 42);
        assert_eq!(read_buf[PAGE_SIZE - 1], 24);

        Ok(())
    }

    #[test]
    fn test_page_boundary() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.tbl"), PAGE_SIZE)?;

        pm.write_page(pid(0), &vec![1u8; PAGE_SIZE])?;
        pm.write_page(pid(1), &vec![2u8; PAGE_SIZE])?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        pm.read_page(pid(0), &mut read_buf)?;
        assert!(read_buf.iter().all(|&b| b == 1));

        pm.read_page(pid(1), &mut read_buf)?;
        assert!(read_buf.iter().all(|&b| b == 2));

        Ok(())
    }

    #[test]
    fn test_read_nonexistent_page() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.tbl"), PAGE_SIZE)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        let result = pm.read_page(pid(10), &mut buf);
        assert!(matches!(
            result,
            Err(StorageError::PageOutOfRange { page_count: 0, .. })
        ));

        Ok(())
    }

    #[test]
    fn test_invalid_buffer_size() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.tbl"), PAGE_SIZE)?;

        let mut small_buf = vec![0u8; 100];
        assert!(pm.read_page(pid(0), &mut small_buf).is_err());
        assert!(pm.write_page(pid(0), &small_buf).is_err());

        Ok(())
    }

    #[test]
    fn test_open_nonexistent_file() -> Result<()> {
        let dir = tempdir()?;
        let result = PageManager::open(&dir.path().join("missing.tbl"), PAGE_SIZE);
        assert!(matches!(result, Err(StorageError::Io(_))));
        Ok(())
    }

    #[test]
    fn test_open_rejects_torn_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("torn.tbl");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 10])?;
        assert!(matches!(
            PageManager::open(&path, PAGE_SIZE),
            Err(StorageError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_persistence_with_small_pages() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.tbl");

        {
            let pm = PageManager::create(&path, 512)?;
            pm.write_page(pid(2), &vec![99u8; 512])?;
            assert_eq!(pm.num_pages()?, 3);
        }

        {
            let pm = PageManager::open(&path, 512)?;
            let mut buf = vec![0u8; 512];
            pm.read_page(pid(2), &mut buf)?;
            assert_eq!(buf[0], 99);
            pm.read_page(pid(0), &mut buf)?;
            assert!(buf.iter().all(|&b| b == 0));
        }

        Ok(())
    }

    #[test]
    fn test_allocate_page() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.tbl"), PAGE_SIZE)?;

        assert_eq!(pm.allocate_page()?, 0);
        assert_eq!(pm.allocate_page()?, 1);
        assert_eq!(pm.num_pages()?, 2);

        let mut buf = vec![1u8; PAGE_SIZE];
        pm.read_page(pid(1), &mut buf)?;
        assert!(buf.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_concurrent_allocation_is_unique() -> Result<()> {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir()?;
        let pm = Arc::new(PageManager::create(&dir.path().join("test.tbl"), 256)?);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pm = Arc::clone(&pm);
                thread::spawn(move || {
                    (0..10)
                        .map(|_| pm.allocate_page().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        assert_eq!(all, (0..40).collect::<Vec<_>>());
        assert_eq!(pm.num_pages()?, 40);

        Ok(())
    }
}
