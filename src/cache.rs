// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 磁盘缓存模块
//!
//! 缓存目录中的每个文件是一条缓存记录，文件名为 `<主机名>.txt`：
//! - 第一行是访问地址（缓存键），以 CRLF 结束；
//! - 其余字节是当初从上游收到的原始响应（响应头 + 响应体），
//!   其中以 `Date` 开头的行作为后续条件请求的新鲜度令牌。
//!
//! 查找时逐个扫描目录中的文件，比较第一行与访问地址。为减少扫描，
//! 内存中维护一个容量有限的 LRU 索引（缓存键 -> 文件路径），但索引只是提示，
//! 每次命中都会回到磁盘核对第一行。
//!
//! 写入与客户端转发同时进行，不是原子的：中途崩溃留下的残缺文件在下次查找时
//! 会被当作有效记录。多个连接同时写同一主机的记录时也没有互斥保护。

use std::{
    fmt, io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use log::{debug, warn};
use lru::LruCache;
use tokio::{
    fs::{self, File},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
};

use crate::{exception::Exception, param::*};

/// 一次缓存请求最终所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// 没有记录，从上游取回并新建记录
    Miss,
    /// 有记录且上游确认未修改，直接使用记录
    Fresh,
    /// 有记录但上游返回了新内容，重建记录
    Stale,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CacheState::Miss => write!(f, "MISS"),
            CacheState::Fresh => write!(f, "FRESH"),
            CacheState::Stale => write!(f, "STALE"),
        }
    }
}

/// 命中的缓存记录
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    path: PathBuf,
    /// 记录中最后一个 `Date` 行的值
    last_modified: Option<String>,
}

impl CacheHit {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }
}

pub struct DiskCache {
    dir: PathBuf,
    index: Mutex<LruCache<String, PathBuf>>,
}

impl DiskCache {
    // 根据缓存目录和索引容量构造
    pub fn new(dir: impl Into<PathBuf>, index_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(index_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir: dir.into(),
            index: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 某个主机的记录文件路径。主机名中的路径分隔符被替换，避免写出缓存目录
    pub fn record_path(&self, host: &str) -> PathBuf {
        let name: String = host
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.{}", name, CACHE_FILE_SUFFIX))
    }

    /// 查找访问地址对应的记录。目录不存在或不可读时视为空缓存。
    pub async fn lookup(&self, key: &str) -> Result<Option<CacheHit>, Exception> {
        if let Some(path) = self.indexed_path(key) {
            if read_key_line(&path).await.ok().flatten().as_deref() == Some(key) {
                return self.hit(path).await.map(Some);
            }
            // 索引过期：记录已被同主机的其他地址覆盖或被删除
            self.forget(key);
        }

        match self.scan(key).await {
            Some(path) => {
                self.remember(key, &path);
                self.hit(path).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// 打开记录并跳过第一行，返回的读取器从存储的响应开始
    pub async fn open_body(&self, hit: &CacheHit) -> Result<BufReader<File>, Exception> {
        let file = File::open(&hit.path).await?;
        let mut reader = BufReader::new(file);
        let mut key_line = Vec::new();
        reader.read_until(b'\n', &mut key_line).await?;
        Ok(reader)
    }

    /// 新建（或截断）记录文件并写入缓存键
    pub async fn create(&self, path: &Path, key: &str) -> Result<CacheWriter, Exception> {
        fs::create_dir_all(&self.dir).await?;
        let file = File::create(path).await?;
        let mut writer = CacheWriter {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            key: key.to_string(),
            written: 0,
        };
        writer.file.write_all(key.as_bytes()).await?;
        writer.file.write_all(CRLF.as_bytes()).await?;
        Ok(writer)
    }

    /// 删除命中的记录并在原位置重建
    pub async fn replace(&self, hit: &CacheHit, key: &str) -> Result<CacheWriter, Exception> {
        match fs::remove_file(&hit.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.forget(key);
        self.create(&hit.path, key).await
    }

    /// 当前索引中的条目数
    pub fn indexed(&self) -> usize {
        self.lock_index().len()
    }

    async fn hit(&self, path: PathBuf) -> Result<CacheHit, Exception> {
        let last_modified = read_last_modified(&path).await?;
        Ok(CacheHit {
            path,
            last_modified,
        })
    }

    async fn scan(&self, key: &str) -> Option<PathBuf> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("缓存目录{}不可读，视为空缓存: {}", self.dir.display(), e);
                return None;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => return None,
                Err(e) => {
                    warn!("遍历缓存目录{}时出错: {}", self.dir.display(), e);
                    return None;
                }
            };
            let path = entry.path();
            match read_key_line(&path).await {
                Ok(Some(line)) if line == key => return Some(path),
                Ok(_) => {}
                Err(e) => debug!("跳过无法读取的缓存文件{}: {}", path.display(), e),
            }
        }
    }

    fn lock_index(&self) -> MutexGuard<'_, LruCache<String, PathBuf>> {
        match self.index.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("缓存索引锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn indexed_path(&self, key: &str) -> Option<PathBuf> {
        self.lock_index().get(key).cloned()
    }

    fn remember(&self, key: &str, path: &Path) {
        self.lock_index().put(key.to_string(), path.to_path_buf());
    }

    fn forget(&self, key: &str) {
        self.lock_index().pop(key);
    }
}

/// 正在写入的缓存记录。写完后必须调用 [`CacheWriter::finish`]，否则缓冲区中的数据会丢失
pub struct CacheWriter {
    file: BufWriter<File>,
    path: PathBuf,
    key: String,
    written: u64,
}

impl CacheWriter {
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), Exception> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// 刷新到磁盘并登记到索引，返回写入的响应字节数（不含缓存键行）
    pub async fn finish(mut self, cache: &DiskCache) -> Result<u64, Exception> {
        self.file.flush().await?;
        cache.remember(&self.key, &self.path);
        Ok(self.written)
    }
}

/// 读取记录的第一行（缓存键），空文件返回 `None`
pub async fn read_key_line(path: &Path) -> io::Result<Option<String>> {
    let mut reader = BufReader::new(File::open(path).await?);
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(trim_line(&line)))
}

/// 扫描整条记录，返回最后一个 `Date` 行的值
pub async fn read_last_modified(path: &Path) -> io::Result<Option<String>> {
    let mut reader = BufReader::new(File::open(path).await?);
    let mut line = Vec::new();
    let mut last_modified = None;

    // 跳过缓存键
    reader.read_until(b'\n', &mut line).await?;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if let Some(value) = date_token(&trim_line(&line)) {
            last_modified = Some(value.to_string());
        }
    }
    Ok(last_modified)
}

/// `Date: Tue, 15 Nov 1994 08:12:31 GMT` -> `Tue, 15 Nov 1994 08:12:31 GMT`
pub fn date_token(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(DATE_MARKER)?.trim_start();
    let value = rest.strip_prefix(':')?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn trim_line(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(|c: char| c == '\r' || c == '\n')
        .to_string()
}
