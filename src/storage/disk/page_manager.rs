use crate::storage::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Random access to a file of fixed-size pages. Page `n` lives at byte offset
/// `n * page_size`.
pub struct PageManager {
    file: File,
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

        Ok(Self { file, page_size })
    }

    pub fn open(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self { file, page_size })
    }

    /// Open `path`, creating an empty file if it does not exist yet.
    pub fn open_or_create(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self { file, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Read page `page_no`. `None` means the page lies past the end of the file.
    pub fn read_page(&mut self, page_no: u32) -> StorageResult<Option<Vec<u8>>> {
        let offset = self.page_offset(page_no);
        let file_size = self.file.metadata()?.len();

        if offset + self.page_size as u64 > file_size {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;

        Ok(Some(buf))
    }

    pub fn write_page(&mut self, page_no: u32, data: &[u8]) -> StorageResult<()> {
        if data.len() != self.page_size {
            return Err(StorageError::InvalidPageSize {
                expected: self.page_size,
                actual: data.len(),
            });
        }

        let offset = self.page_offset(page_no);
        let file_size = self.file.metadata()?.len();

        // Extend file if necessary
        if offset >= file_size {
            self.file.set_len(offset + self.page_size as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_data()?;

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / self.page_size as u64) as u32)
    }

    /// Append a zeroed page and return its page number.
    pub fn allocate_page(&mut self) -> StorageResult<u32> {
        let page_no = self.num_pages()?;
        let zeroed = vec![0u8; self.page_size];
        self.write_page(page_no, &zeroed)?;
        Ok(page_no)
    }

    fn page_offset(&self, page_no: u32) -> u64 {
        page_no as u64 * self.page_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    const PAGE: usize = 512;

    #[test]
    fn test_create_and_open() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.tbl");

        {
            let pm = PageManager::create(&file_path, PAGE)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        {
            let pm = PageManager::open(&file_path, PAGE)?;
            assert_eq!(pm.num_pages()?, 0);
            assert_eq!(pm.page_size(), PAGE);
        }

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.tbl"), PAGE)?;

        let mut write_buf = vec![0u8; PAGE];
        write_buf[0] = 42;
        write_buf[PAGE - 1] = 24;
        pm.write_page(0, &write_buf)?;

        let read_buf = pm.read_page(0)?.expect("page 0 was written");
        assert_eq!(read_buf, write_buf);

        Ok(())
    }

    #[test]
    fn test_read_past_end() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.tbl"), PAGE)?;
        pm.write_page(0, &vec![1u8; PAGE])?;

        assert!(pm.read_page(0)?.is_some());
        assert!(pm.read_page(1)?.is_none());
        assert!(pm.read_page(10)?.is_none());

        Ok(())
    }

    #[test]
    fn test_invalid_buffer_size() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.tbl"), PAGE)?;

        let result = pm.write_page(0, &[0u8; 100]);
        assert!(matches!(
            result,
            Err(StorageError::InvalidPageSize {
                expected: PAGE,
                actual: 100
            })
        ));

        Ok(())
    }

    #[test]
    fn test_file_growth() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.tbl"), PAGE)?;

        // Writing page 5 implicitly extends the file over pages 0-4.
        pm.write_page(5, &vec![5u8; PAGE])?;
        assert_eq!(pm.num_pages()?, 6);
        assert!(pm.read_page(3)?.expect("zero filled").iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_num_pages_floors_partial_page() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.tbl");
        std::fs::write(&path, vec![0u8; PAGE * 2 + 17])?;

        let pm = PageManager::open(&path, PAGE)?;
        assert_eq!(pm.num_pages()?, 2);

        Ok(())
    }

    #[test]
    fn test_allocate_page() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("test.tbl"), PAGE)?;

        assert_eq!(pm.allocate_page()?, 0);
        assert_eq!(pm.allocate_page()?, 1);
        assert_eq!(pm.num_pages()?, 2);
        assert!(pm.read_page(1)?.expect("allocated").iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.tbl");

        {
            let mut pm = PageManager::create(&path, PAGE)?;
            pm.write_page(0, &vec![99u8; PAGE])?;
        }

        {
            let mut pm = PageManager::open_or_create(&path, PAGE)?;
            assert_eq!(pm.num_pages()?, 1);
            assert_eq!(pm.read_page(0)?.expect("persisted")[0], 99);
        }

        Ok(())
    }
}
