use super::{
    error::{SyncError, SyncResult},
    path::SyncPath,
    report::SyncReporter,
    scan_policies::ScanPoliciesManager,
};
use b2_apis::{utils::join_b2_path, FileVersion, Session};
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

/// 同步的一端
///
/// 要么是本地目录树，要么是远端存储空间内的一个前缀。
#[derive(Debug)]
pub enum SyncFolder {
    /// 本地目录树
    Local(LocalFolder),
    /// 远端存储空间前缀
    B2(B2Folder),
}

impl SyncFolder {
    /// 枚举这一端的全部同步路径，按相对路径的字节序输出
    pub fn all_files<'a>(
        &'a self,
        reporter: &'a dyn SyncReporter,
        policies: &'a ScanPoliciesManager,
    ) -> SyncResult<Box<dyn Iterator<Item = SyncResult<SyncPath>> + 'a>> {
        match self {
            Self::Local(folder) => Ok(Box::new(folder.all_files(reporter, policies)?)),
            Self::B2(folder) => Ok(Box::new(folder.all_files(policies))),
        }
    }
}

/// 本地目录树
#[derive(Debug)]
pub struct LocalFolder {
    root: PathBuf,
}

impl LocalFolder {
    /// 创建本地目录树
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 同步根目录
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 确保根目录存在
    pub fn ensure_present(&self) -> SyncResult<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|_| SyncError::UnableToCreateDirectory {
                path: self.root.display().to_string(),
            })?;
        } else if !self.root.is_dir() {
            return Err(SyncError::NotADirectory {
                path: self.root.display().to_string(),
            });
        }
        Ok(())
    }

    /// 确保根目录存在且非空
    pub fn ensure_non_empty(&self) -> SyncResult<()> {
        self.ensure_present()?;
        let mut entries = fs::read_dir(&self.root)?;
        if entries.next().is_none() {
            return Err(SyncError::EmptyDirectory {
                path: self.root.display().to_string(),
            });
        }
        Ok(())
    }

    /// 把相对路径换算为根目录内的绝对路径
    ///
    /// 逃逸出根目录的路径被拒绝。
    pub fn make_full_path(&self, relative_path: &str) -> SyncResult<PathBuf> {
        let mut full_path = self.root.to_owned();
        for segment in relative_path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(SyncError::UnSyncableFilename {
                    message: "illegal file name".to_owned(),
                    path: relative_path.to_owned(),
                });
            }
            full_path.push(segment);
        }
        Ok(full_path)
    }

    /// 深度优先地枚举全部文件
    ///
    /// 为了与远端列表对齐，排序时目录名按带有结尾 `/` 处理，
    /// 因此 `a.txt` 在 `a/b` 之前，`a/b` 在 `a0` 之前。
    pub fn all_files<'a>(
        &'a self,
        reporter: &'a dyn SyncReporter,
        policies: &'a ScanPoliciesManager,
    ) -> SyncResult<LocalPathIterator<'a>> {
        LocalPathIterator::new(self, reporter, policies)
    }
}

#[derive(Debug)]
struct DirEntryInfo {
    sort_key: String,
    path: PathBuf,
    relative_path: String,
    is_dir: bool,
    mod_time_millis: u64,
    size: u64,
}

/// 本地目录树的惰性迭代器
#[derive(Debug)]
pub struct LocalPathIterator<'a> {
    folder: &'a LocalFolder,
    reporter: &'a dyn SyncReporter,
    policies: &'a ScanPoliciesManager,
    stack: Vec<std::vec::IntoIter<DirEntryInfo>>,
}

impl<'a> LocalPathIterator<'a> {
    fn new(
        folder: &'a LocalFolder,
        reporter: &'a dyn SyncReporter,
        policies: &'a ScanPoliciesManager,
    ) -> SyncResult<Self> {
        let mut iterator = Self {
            folder,
            reporter,
            policies,
            stack: Vec::new(),
        };
        let root = folder.root().to_owned();
        let entries = iterator.list_dir(&root, "")?;
        iterator.stack.push(entries.into_iter());
        Ok(iterator)
    }

    fn list_dir(&self, dir: &Path, relative_dir: &str) -> SyncResult<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    return Err(SyncError::UnSyncableFilename {
                        message: "file name is not valid unicode".to_owned(),
                        path: format!("{name:?} in dir {}", dir.display()),
                    })
                }
            };
            if name.contains('/') {
                return Err(SyncError::UnSyncableFilename {
                    message: "sync does not support file names that include '/'".to_owned(),
                    path: format!("{name} in dir {}", dir.display()),
                });
            }
            let path = entry.path();
            let is_symlink = path
                .symlink_metadata()
                .map(|metadata| metadata.file_type().is_symlink())
                .unwrap_or(false);
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(_) => {
                    // 失效的符号链接或不可访问的文件
                    self.reporter.local_access_error(&path);
                    continue;
                }
            };
            if is_symlink && self.policies.exclude_all_symlinks() {
                self.reporter.symlink_skipped(&path);
                continue;
            }
            let relative_path = join_b2_path(relative_dir, &name);
            if metadata.is_dir() {
                if self.policies.should_exclude_local_directory(&relative_path) {
                    continue;
                }
                entries.push(DirEntryInfo {
                    sort_key: format!("{name}/"),
                    path,
                    relative_path,
                    is_dir: true,
                    mod_time_millis: 0,
                    size: 0,
                });
            } else {
                let mod_time_millis = metadata
                    .modified()
                    .ok()
                    .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                    .map(|elapsed| elapsed.as_millis() as u64)
                    .unwrap_or_default();
                entries.push(DirEntryInfo {
                    sort_key: name,
                    path,
                    relative_path,
                    is_dir: false,
                    mod_time_millis,
                    size: metadata.len(),
                });
            }
        }
        entries.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
        Ok(entries)
    }
}

impl Iterator for LocalPathIterator<'_> {
    type Item = SyncResult<SyncPath>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            let Some(entry) = top.next() else {
                self.stack.pop();
                continue;
            };
            if entry.is_dir {
                match self.list_dir(&entry.path, &entry.relative_path) {
                    Ok(entries) => self.stack.push(entries.into_iter()),
                    Err(err) => return Some(Err(err)),
                }
                continue;
            }
            let sync_path = SyncPath::Local {
                absolute_path: entry.path,
                relative_path: entry.relative_path,
                mod_time_millis: entry.mod_time_millis,
                size: entry.size,
            };
            if self.policies.should_exclude_path(&sync_path) {
                continue;
            }
            return Some(Ok(sync_path));
        }
    }
}

/// 远端存储空间内的一个前缀
#[derive(Debug)]
pub struct B2Folder {
    session: Arc<Session>,
    bucket_name: String,
    bucket_id: String,
    folder_name: String,
}

impl B2Folder {
    /// 创建远端同步端，立即解析存储空间 ID
    pub fn new(session: Arc<Session>, bucket_name: impl Into<String>, folder_name: impl Into<String>) -> SyncResult<Self> {
        let bucket_name = bucket_name.into();
        let folder_name = folder_name.into().trim_matches('/').to_owned();
        let bucket = session.get_bucket_by_name(&bucket_name)?;
        Ok(Self {
            session,
            bucket_name,
            bucket_id: bucket.bucket_id,
            folder_name,
        })
    }

    /// 存储空间名称
    #[inline]
    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// 存储空间 ID
    #[inline]
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    /// 获取会话
    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn prefix(&self) -> String {
        if self.folder_name.is_empty() {
            String::new()
        } else {
            format!("{}/", self.folder_name)
        }
    }

    /// 把相对路径换算为存储空间内的完整对象名
    pub fn make_full_b2_path(&self, relative_path: &str) -> String {
        format!("{}{relative_path}", self.prefix())
    }

    /// 枚举前缀下的全部同步路径
    ///
    /// 同名的相邻版本被归并为一个条目，未完成的大文件会话被忽略。
    pub fn all_files<'a>(&'a self, policies: &'a ScanPoliciesManager) -> B2PathIterator<'a> {
        B2PathIterator {
            folder: self,
            policies,
            prefix: self.prefix(),
            buffered: VecDeque::new(),
            next_file_name: None,
            next_file_id: None,
            pages_exhausted: false,
            pending: None,
            done: false,
        }
    }
}

/// 远端前缀的惰性迭代器
#[derive(Debug)]
pub struct B2PathIterator<'a> {
    folder: &'a B2Folder,
    policies: &'a ScanPoliciesManager,
    prefix: String,
    buffered: VecDeque<FileVersion>,
    next_file_name: Option<String>,
    next_file_id: Option<String>,
    pages_exhausted: bool,
    pending: Option<(String, Vec<FileVersion>)>,
    done: bool,
}

impl B2PathIterator<'_> {
    fn next_version(&mut self) -> SyncResult<Option<FileVersion>> {
        loop {
            if let Some(version) = self.buffered.pop_front() {
                return Ok(Some(version));
            }
            if self.pages_exhausted {
                return Ok(None);
            }
            let prefix = if self.prefix.is_empty() { None } else { Some(self.prefix.as_str()) };
            let page = self.folder.session.list_file_versions(
                &self.folder.bucket_id,
                self.next_file_name.as_deref(),
                self.next_file_id.as_deref(),
                None,
                prefix,
            )?;
            self.buffered.extend(page.files);
            self.next_file_name = page.next_file_name;
            self.next_file_id = page.next_file_id;
            if self.next_file_name.is_none() {
                self.pages_exhausted = true;
            }
        }
    }

    fn emit(&mut self, relative_path: String, versions: Vec<FileVersion>) -> Option<SyncPath> {
        let sync_path = SyncPath::B2 {
            relative_path,
            versions,
        };
        if self.policies.should_exclude_path(&sync_path) {
            None
        } else {
            Some(sync_path)
        }
    }
}

impl Iterator for B2PathIterator<'_> {
    type Item = SyncResult<SyncPath>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let version = match self.next_version() {
                Ok(version) => version,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            let Some(version) = version else {
                self.done = true;
                if let Some((relative_path, versions)) = self.pending.take() {
                    if let Some(sync_path) = self.emit(relative_path, versions) {
                        return Some(Ok(sync_path));
                    }
                }
                return None;
            };
            // 未完成的大文件会话不参与同步
            if version.action == "start" {
                continue;
            }
            let Some(relative_path) = version.file_name.strip_prefix(&self.prefix) else {
                continue;
            };
            let relative_path = relative_path.to_owned();
            if let Err(err) = check_remote_name(&relative_path) {
                self.done = true;
                return Some(Err(err));
            }
            match &mut self.pending {
                Some((pending_path, versions)) if *pending_path == relative_path => {
                    versions.push(version);
                }
                _ => {
                    let previous = self.pending.replace((relative_path, vec![version]));
                    if let Some((previous_path, versions)) = previous {
                        if let Some(sync_path) = self.emit(previous_path, versions) {
                            return Some(Ok(sync_path));
                        }
                    }
                }
            }
        }
    }
}

/// 校验远端对象名能否安全地映射为本地相对路径
fn check_remote_name(name: &str) -> SyncResult<()> {
    let reject = |message: &str| {
        Err(SyncError::UnSyncableFilename {
            message: message.to_owned(),
            path: name.to_owned(),
        })
    };
    if name.is_empty() {
        return reject("empty file name");
    }
    if name.starts_with('/') {
        return reject("file names must not be absolute");
    }
    if name.contains("//") {
        return reject("file names must not contain '//'");
    }
    if name.contains('\\') {
        return reject("file names must not contain '\\'");
    }
    if name.split('/').any(|segment| segment == "." || segment == "..") {
        return reject("file names must not contain '.' or '..' segments");
    }
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return reject("file names must not start with a drive letter");
    }
    Ok(())
}

/// 把两端的扫描流按相对路径归并
///
/// 对每个出现过的相对路径产出 `(来源, 目标)` 二元组，
/// 只在一侧出现时另一侧为 [`None`]。两侧都只需要一步前瞻。
pub fn zip_folders<'a>(
    source: Box<dyn Iterator<Item = SyncResult<SyncPath>> + 'a>,
    dest: Box<dyn Iterator<Item = SyncResult<SyncPath>> + 'a>,
) -> ZipFolders<'a> {
    ZipFolders {
        source,
        dest,
        next_source: None,
        next_dest: None,
        primed: false,
        done: false,
    }
}

/// 两端扫描流的归并迭代器
pub struct ZipFolders<'a> {
    source: Box<dyn Iterator<Item = SyncResult<SyncPath>> + 'a>,
    dest: Box<dyn Iterator<Item = SyncResult<SyncPath>> + 'a>,
    next_source: Option<SyncPath>,
    next_dest: Option<SyncPath>,
    primed: bool,
    done: bool,
}

impl ZipFolders<'_> {
    fn advance(
        iterator: &mut dyn Iterator<Item = SyncResult<SyncPath>>,
        slot: &mut Option<SyncPath>,
    ) -> SyncResult<()> {
        *slot = match iterator.next() {
            Some(result) => Some(result?),
            None => None,
        };
        Ok(())
    }
}

impl Iterator for ZipFolders<'_> {
    type Item = SyncResult<(Option<SyncPath>, Option<SyncPath>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.primed {
            self.primed = true;
            if let Err(err) = Self::advance(&mut self.source, &mut self.next_source) {
                self.done = true;
                return Some(Err(err));
            }
            if let Err(err) = Self::advance(&mut self.dest, &mut self.next_dest) {
                self.done = true;
                return Some(Err(err));
            }
        }
        let emit = match (&self.next_source, &self.next_dest) {
            (None, None) => {
                self.done = true;
                return None;
            }
            (Some(_), None) => (true, false),
            (None, Some(_)) => (false, true),
            (Some(source), Some(dest)) => match source.relative_path().cmp(dest.relative_path()) {
                std::cmp::Ordering::Less => (true, false),
                std::cmp::Ordering::Greater => (false, true),
                std::cmp::Ordering::Equal => (true, true),
            },
        };
        let source = if emit.0 {
            let taken = self.next_source.take();
            if let Err(err) = Self::advance(&mut self.source, &mut self.next_source) {
                self.done = true;
                return Some(Err(err));
            }
            taken
        } else {
            None
        };
        let dest = if emit.1 {
            let taken = self.next_dest.take();
            if let Err(err) = Self::advance(&mut self.dest, &mut self.next_dest) {
                self.done = true;
                return Some(Err(err));
            }
            taken
        } else {
            None
        };
        Some(Ok((source, dest)))
    }
}

#[cfg(test)]
mod tests {
    use super::{super::report::NopSyncReporter, *};
    use std::fs::File;
    use std::io::Write;

    fn collect_relative_paths(folder: &LocalFolder, policies: &ScanPoliciesManager) -> SyncResult<Vec<String>> {
        let reporter = NopSyncReporter;
        folder
            .all_files(&reporter, policies)?
            .map(|result| result.map(|path| path.relative_path().to_owned()))
            .collect()
    }

    #[test]
    fn test_local_walk_orders_directories_with_trailing_slash() -> SyncResult<()> {
        let dir = tempfile::tempdir().unwrap();
        // '.' < '/' < '0'，因此 a.txt 在 a/b.txt 之前，a/b.txt 在 a0.txt 之前
        File::create(dir.path().join("a.txt")).unwrap();
        File::create(dir.path().join("a0.txt")).unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        File::create(dir.path().join("a").join("b.txt")).unwrap();
        File::create(dir.path().join("a").join("c.txt")).unwrap();

        let folder = LocalFolder::new(dir.path());
        let paths = collect_relative_paths(&folder, &Default::default())?;
        assert_eq!(paths, vec!["a.txt", "a/b.txt", "a/c.txt", "a0.txt"]);
        Ok(())
    }

    #[test]
    fn test_local_walk_applies_policies() -> SyncResult<()> {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("keep.txt")).unwrap();
        File::create(dir.path().join("skip.log")).unwrap();
        fs::create_dir(dir.path().join("excluded")).unwrap();
        File::create(dir.path().join("excluded").join("inside.txt")).unwrap();

        let folder = LocalFolder::new(dir.path());
        let policies = ScanPoliciesManager::builder()
            .exclude_file_regex(r".*\.log$")
            .exclude_dir_regex("^excluded$")
            .build()?;
        let paths = collect_relative_paths(&folder, &policies)?;
        assert_eq!(paths, vec!["keep.txt"]);
        Ok(())
    }

    #[test]
    fn test_make_full_path_rejects_escapes() {
        let folder = LocalFolder::new("/tmp/sync-root");
        assert!(folder.make_full_path("a/../../etc/passwd").is_err());
        assert!(folder.make_full_path("a//b").is_err());
        assert!(folder.make_full_path("a/b.txt").is_ok());
    }

    #[test]
    fn test_check_remote_name() {
        assert!(check_remote_name("a/b.txt").is_ok());
        assert!(check_remote_name("/absolute").is_err());
        assert!(check_remote_name("a//b").is_err());
        assert!(check_remote_name("a/../b").is_err());
        assert!(check_remote_name("./a").is_err());
        assert!(check_remote_name("C:stuff").is_err());
        assert!(check_remote_name("back\\slash").is_err());
    }

    #[test]
    fn test_zip_folders_merges_by_relative_path() {
        let local = |name: &str| SyncPath::Local {
            absolute_path: name.into(),
            relative_path: name.to_owned(),
            mod_time_millis: 0,
            size: 0,
        };
        let source: Vec<SyncResult<SyncPath>> = vec![Ok(local("a")), Ok(local("b")), Ok(local("d"))];
        let dest: Vec<SyncResult<SyncPath>> = vec![Ok(local("b")), Ok(local("c"))];
        let pairs = zip_folders(Box::new(source.into_iter()), Box::new(dest.into_iter()))
            .map(|pair| {
                let (source, dest) = pair.unwrap();
                (
                    source.map(|path| path.relative_path().to_owned()),
                    dest.map(|path| path.relative_path().to_owned()),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                (Some("a".to_owned()), None),
                (Some("b".to_owned()), Some("b".to_owned())),
                (None, Some("c".to_owned())),
                (Some("d".to_owned()), None),
            ]
        );
    }

    #[test]
    fn test_writeable_dir_is_non_empty() -> SyncResult<()> {
        let dir = tempfile::tempdir().unwrap();
        let folder = LocalFolder::new(dir.path().join("fresh"));
        folder.ensure_present()?;
        assert!(matches!(folder.ensure_non_empty(), Err(SyncError::EmptyDirectory { .. })));
        let mut file = File::create(folder.root().join("something.txt")).unwrap();
        file.write_all(b"content").unwrap();
        folder.ensure_non_empty()?;
        Ok(())
    }
}
