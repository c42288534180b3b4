/*!
 * In-Memory Runtime
 * Volatile stand-ins for the native collaborators, for tests and host runs
 *
 * Every handle is cheap to clone and shares its state, so a test can keep
 * one copy for inspection while the dispatcher owns another.
 */

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::core::types::Fd;

// =============================================================================
// CLOCK
// =============================================================================

/// Manually advanced clock shared by the filesystem and the environment
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<Mutex<Duration>>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        *self.0.lock()
    }

    pub fn set(&self, at: Duration) {
        *self.0.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock();
        *now = now.saturating_add(by);
    }
}

// =============================================================================
// FILESYSTEM
// =============================================================================

const DEVICE: u32 = 1;
const ROOT_INODE: u64 = 1;

#[derive(Debug)]
enum Content {
    File(Vec<u8>),
    Directory,
}

#[derive(Debug)]
struct Inode {
    content: Content,
    perm: u32,
    links: u32,
    accessed: u64,
    modified: u64,
}

impl Inode {
    fn is_dir(&self) -> bool {
        matches!(self.content, Content::Directory)
    }

    fn size(&self) -> u64 {
        match &self.content {
            Content::File(data) => data.len() as u64,
            Content::Directory => 0,
        }
    }
}

#[derive(Debug)]
struct OpenFile {
    inode: u64,
    path: String,
    pos: u64,
    mode: OpenMode,
}

#[derive(Debug)]
struct FsState {
    /// Absolute normalised path to inode number
    names: BTreeMap<String, u64>,
    inodes: HashMap<u64, Inode>,
    files: Vec<Option<OpenFile>>,
    cwd: String,
    next_inode: u64,
}

/// Normalise `path` against `cwd`, resolving `.` and `..`
fn normalize(cwd: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
    };
    for comp in joined.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn is_child_of(dir: &str, candidate: &str) -> Option<String> {
    let rest = if dir == "/" {
        candidate.strip_prefix('/')?
    } else {
        candidate.strip_prefix(dir)?.strip_prefix('/')?
    };
    (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
}

fn in_subtree(root: &str, candidate: &str) -> bool {
    candidate == root
        || candidate
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl FsState {
    fn lookup(&self, path: &str) -> NativeResult<u64> {
        self.names.get(path).copied().ok_or(NativeError::NoSuchFile)
    }

    fn inode(&self, ino: u64) -> NativeResult<&Inode> {
        self.inodes.get(&ino).ok_or(NativeError::NoSuchFile)
    }

    fn inode_mut(&mut self, ino: u64) -> NativeResult<&mut Inode> {
        self.inodes.get_mut(&ino).ok_or(NativeError::NoSuchFile)
    }

    fn open_file(&mut self, fd: Fd) -> NativeResult<&mut OpenFile> {
        usize::try_from(fd)
            .ok()
            .and_then(|idx| self.files.get_mut(idx))
            .and_then(Option::as_mut)
            .ok_or(NativeError::BadDescriptor)
    }

    fn children(&self, dir: &str) -> Vec<(String, u64)> {
        self.names
            .iter()
            .filter_map(|(path, &ino)| is_child_of(dir, path).map(|name| (name, ino)))
            .collect()
    }

    fn ensure_parent_dir(&self, path: &str) -> NativeResult<()> {
        let parent = self.lookup(parent_of(path))?;
        if !self.inode(parent)?.is_dir() {
            return Err(NativeError::NotADirectory);
        }
        Ok(())
    }

    fn create(&mut self, path: &str, content: Content, perm: u32, now: u64) -> NativeResult<u64> {
        if self.names.contains_key(path) {
            return Err(NativeError::Exists);
        }
        self.ensure_parent_dir(path)?;
        let ino = self.next_inode;
        self.next_inode += 1;
        self.inodes.insert(
            ino,
            Inode {
                content,
                perm: perm & 0o7777,
                links: 1,
                accessed: now,
                modified: now,
            },
        );
        self.names.insert(path.to_string(), ino);
        Ok(ino)
    }

    fn is_referenced(&self, ino: u64) -> bool {
        self.files.iter().flatten().any(|f| f.inode == ino)
    }

    fn drop_link(&mut self, ino: u64) {
        let gone = match self.inodes.get_mut(&ino) {
            Some(inode) => {
                inode.links = inode.links.saturating_sub(1);
                inode.links == 0
            }
            None => false,
        };
        if gone && !self.is_referenced(ino) {
            self.inodes.remove(&ino);
        }
    }

    fn info(&self, ino: u64) -> NativeResult<FileInfo> {
        let inode = self.inode(ino)?;
        let kind = if inode.is_dir() {
            FileInfo::S_IFDIR
        } else {
            FileInfo::S_IFREG
        };
        Ok(FileInfo {
            devno: DEVICE,
            inode: ino,
            mode: kind | inode.perm,
            links: inode.links,
            size: inode.size(),
            last_access: inode.accessed,
            last_modified: inode.modified,
        })
    }
}

/// In-memory file system with its own file table
#[derive(Debug, Clone)]
pub struct MemFs {
    state: Arc<Mutex<FsState>>,
    clock: ManualClock,
}

impl MemFs {
    /// Create an empty file system whose file table has `max_fds` entries
    pub fn new(max_fds: usize) -> Self {
        Self::with_clock(max_fds, ManualClock::new())
    }

    pub fn with_clock(max_fds: usize, clock: ManualClock) -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(
            ROOT_INODE,
            Inode {
                content: Content::Directory,
                perm: 0o755,
                links: 2,
                accessed: 0,
                modified: 0,
            },
        );
        let mut names = BTreeMap::new();
        names.insert("/".to_string(), ROOT_INODE);

        let mut files = Vec::with_capacity(max_fds);
        files.resize_with(max_fds, || None);

        Self {
            state: Arc::new(Mutex::new(FsState {
                names,
                inodes,
                files,
                cwd: "/".to_string(),
                next_inode: ROOT_INODE + 1,
            })),
            clock,
        }
    }

    fn now_secs(&self) -> u64 {
        self.clock.now().as_secs()
    }

    /// Create or replace a regular file with `data`
    pub fn write_file(&self, path: &str, data: &[u8]) -> NativeResult<()> {
        let now = self.now_secs();
        let mut state = self.state.lock();
        let path = normalize(&state.cwd, path);
        let ino = match state.names.get(&path).copied() {
            Some(ino) => ino,
            None => state.create(&path, Content::File(Vec::new()), 0o644, now)?,
        };
        let inode = state.inode_mut(ino)?;
        match &mut inode.content {
            Content::File(content) => {
                content.clear();
                content.extend_from_slice(data);
                inode.modified = now;
                Ok(())
            }
            Content::Directory => Err(NativeError::IsDirectory),
        }
    }

    pub fn create_dir(&self, path: &str) -> NativeResult<()> {
        let now = self.now_secs();
        let mut state = self.state.lock();
        let path = normalize(&state.cwd, path);
        state.create(&path, Content::Directory, 0o755, now).map(|_| ())
    }

    /// Contents of a regular file
    pub fn read_file(&self, path: &str) -> NativeResult<Vec<u8>> {
        let state = self.state.lock();
        let path = normalize(&state.cwd, path);
        match &state.inode(state.lookup(&path)?)?.content {
            Content::File(data) => Ok(data.clone()),
            Content::Directory => Err(NativeError::IsDirectory),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        let state = self.state.lock();
        let path = normalize(&state.cwd, path);
        state.names.contains_key(&path)
    }

    /// Number of descriptors currently open
    pub fn open_count(&self) -> usize {
        self.state.lock().files.iter().flatten().count()
    }
}

impl FileSystem for MemFs {
    fn open(&mut self, path: &str, mode: OpenMode) -> NativeResult<Fd> {
        let now = self.now_secs();
        let mut state = self.state.lock();
        let path = normalize(&state.cwd, path);

        let ino = match state.names.get(&path).copied() {
            Some(ino) => ino,
            None if mode.contains(OpenMode::CREATE) => {
                state.create(&path, Content::File(Vec::new()), 0o644, now)?
            }
            None => return Err(NativeError::NoSuchFile),
        };

        let inode = state.inode_mut(ino)?;
        match &mut inode.content {
            Content::Directory if mode.contains(OpenMode::WRITE) => {
                return Err(NativeError::IsDirectory)
            }
            Content::File(data) if mode.contains(OpenMode::TRUNC | OpenMode::WRITE) => {
                data.clear();
                inode.modified = now;
            }
            _ => {}
        }

        let idx = state
            .files
            .iter()
            .position(Option::is_none)
            .ok_or(NativeError::NoSpace)?;
        state.files[idx] = Some(OpenFile {
            inode: ino,
            path,
            pos: 0,
            mode,
        });
        Ok(idx as Fd)
    }

    fn close(&mut self, fd: Fd) -> NativeResult<()> {
        let mut state = self.state.lock();
        let file = usize::try_from(fd)
            .ok()
            .and_then(|idx| state.files.get_mut(idx))
            .and_then(Option::take)
            .ok_or(NativeError::BadDescriptor)?;
        let orphan = state.inodes.get(&file.inode).is_some_and(|i| i.links == 0);
        if orphan && !state.is_referenced(file.inode) {
            state.inodes.remove(&file.inode);
        }
        Ok(())
    }

    fn read(&mut self, fd: Fd, buf: &mut [u8]) -> NativeResult<Option<usize>> {
        let now = self.now_secs();
        let mut state = self.state.lock();
        let file = state.open_file(fd)?;
        if !file.mode.contains(OpenMode::READ) {
            return Err(NativeError::BadDescriptor);
        }
        let (ino, pos) = (file.inode, file.pos);

        let inode = state.inode_mut(ino)?;
        let data = match &inode.content {
            Content::File(data) => data,
            Content::Directory => return Err(NativeError::IsDirectory),
        };
        let start = (pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        inode.accessed = now;

        state.open_file(fd)?.pos = pos + n as u64;
        Ok(Some(n))
    }

    fn write(&mut self, fd: Fd, buf: &[u8]) -> NativeResult<Option<usize>> {
        let now = self.now_secs();
        let mut state = self.state.lock();
        let file = state.open_file(fd)?;
        if !file.mode.contains(OpenMode::WRITE) {
            return Err(NativeError::BadDescriptor);
        }
        let (ino, pos, append) = (file.inode, file.pos, file.mode.contains(OpenMode::APPEND));

        let inode = state.inode_mut(ino)?;
        let data = match &mut inode.content {
            Content::File(data) => data,
            Content::Directory => return Err(NativeError::IsDirectory),
        };
        let start = if append { data.len() } else { pos as usize };
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        inode.modified = now;

        state.open_file(fd)?.pos = end as u64;
        Ok(Some(buf.len()))
    }

    fn seek(&mut self, fd: Fd, offset: i64, origin: SeekOrigin) -> NativeResult<u64> {
        let mut state = self.state.lock();
        let (ino, pos) = {
            let file = state.open_file(fd)?;
            (file.inode, file.pos)
        };
        let size = state.inode(ino)?.size();
        let base = match origin {
            SeekOrigin::Set => 0,
            SeekOrigin::Cur => pos as i64,
            SeekOrigin::End => size as i64,
        };
        let target = base.checked_add(offset).ok_or(NativeError::InvalidArgs)?;
        let target = u64::try_from(target).map_err(|_| NativeError::InvalidArgs)?;
        state.open_file(fd)?.pos = target;
        Ok(target)
    }

    fn truncate(&mut self, fd: Fd, length: u64) -> NativeResult<()> {
        let now = self.now_secs();
        let mut state = self.state.lock();
        let file = state.open_file(fd)?;
        if !file.mode.contains(OpenMode::WRITE) {
            return Err(NativeError::InvalidArgs);
        }
        let ino = file.inode;
        let inode = state.inode_mut(ino)?;
        match &mut inode.content {
            Content::File(data) => {
                data.resize(length as usize, 0);
                inode.modified = now;
                Ok(())
            }
            Content::Directory => Err(NativeError::IsDirectory),
        }
    }

    fn sync(&mut self, fd: Fd) -> NativeResult<()> {
        self.state.lock().open_file(fd).map(|_| ())
    }

    fn stat(&mut self, path: &str) -> NativeResult<FileInfo> {
        let state = self.state.lock();
        let path = normalize(&state.cwd, path);
        state.info(state.lookup(&path)?)
    }

    fn fstat(&mut self, fd: Fd) -> NativeResult<FileInfo> {
        let mut state = self.state.lock();
        let ino = state.open_file(fd)?.inode;
        state.info(ino)
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> NativeResult<()> {
        let now = self.now_secs();
        let mut state = self.state.lock();
        let path = normalize(&state.cwd, path);
        state.create(&path, Content::Directory, mode, now)?;
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        let path = normalize(&state.cwd, path);
        if path == "/" {
            return Err(NativeError::NoPermission);
        }
        let ino = state.lookup(&path)?;
        if !state.inode(ino)?.is_dir() {
            return Err(NativeError::NotADirectory);
        }
        if !state.children(&path).is_empty() {
            return Err(NativeError::DirNotEmpty);
        }
        state.names.remove(&path);
        state.drop_link(ino);
        Ok(())
    }

    fn rename(&mut self, old: &str, new: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        let old = normalize(&state.cwd, old);
        let new = normalize(&state.cwd, new);
        if old == "/" || new == "/" {
            return Err(NativeError::NoPermission);
        }
        let ino = state.lookup(&old)?;
        if old == new {
            return Ok(());
        }
        if in_subtree(&old, &new) {
            return Err(NativeError::InvalidArgs);
        }
        state.ensure_parent_dir(&new)?;

        let moving_dir = state.inode(ino)?.is_dir();
        if let Some(target) = state.names.get(&new).copied() {
            let target_dir = state.inode(target)?.is_dir();
            match (moving_dir, target_dir) {
                (true, false) => return Err(NativeError::NotADirectory),
                (false, true) => return Err(NativeError::IsDirectory),
                (true, true) if !state.children(&new).is_empty() => {
                    return Err(NativeError::DirNotEmpty)
                }
                _ => {}
            }
            state.names.remove(&new);
            state.drop_link(target);
        }

        let moved: Vec<(String, u64)> = state
            .names
            .iter()
            .filter(|(path, _)| in_subtree(&old, path))
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();
        for (path, ino) in moved {
            state.names.remove(&path);
            let renamed = format!("{}{}", new, &path[old.len()..]);
            state.names.insert(renamed, ino);
        }
        Ok(())
    }

    fn link(&mut self, old: &str, new: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        let old = normalize(&state.cwd, old);
        let new = normalize(&state.cwd, new);
        let ino = state.lookup(&old)?;
        if state.inode(ino)?.is_dir() {
            return Err(NativeError::NoPermission);
        }
        if state.names.contains_key(&new) {
            return Err(NativeError::Exists);
        }
        state.ensure_parent_dir(&new)?;
        state.names.insert(new, ino);
        state.inode_mut(ino)?.links += 1;
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        let path = normalize(&state.cwd, path);
        let ino = state.lookup(&path)?;
        if state.inode(ino)?.is_dir() {
            return Err(NativeError::IsDirectory);
        }
        state.names.remove(&path);
        state.drop_link(ino);
        Ok(())
    }

    fn open_dir(&mut self, fd: Fd) -> NativeResult<Box<dyn DirStream>> {
        let mut state = self.state.lock();
        let (ino, path) = {
            let file = state.open_file(fd)?;
            (file.inode, file.path.clone())
        };
        if !state.inode(ino)?.is_dir() {
            return Err(NativeError::NotADirectory);
        }
        let parent = state.lookup(parent_of(&path)).unwrap_or(ino);

        let mut entries = VecDeque::new();
        entries.push_back(DirEntry::new(ino, "."));
        entries.push_back(DirEntry::new(parent, ".."));
        entries.extend(
            state
                .children(&path)
                .into_iter()
                .map(|(name, ino)| DirEntry::new(ino, name)),
        );
        Ok(Box::new(MemDirStream { entries }))
    }

    fn chdir(&mut self, path: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        let path = normalize(&state.cwd, path);
        if !state.inode(state.lookup(&path)?)?.is_dir() {
            return Err(NativeError::NotADirectory);
        }
        state.cwd = path;
        Ok(())
    }

    fn fchdir(&mut self, fd: Fd) -> NativeResult<()> {
        let mut state = self.state.lock();
        let (ino, path) = {
            let file = state.open_file(fd)?;
            (file.inode, file.path.clone())
        };
        if !state.inode(ino)?.is_dir() {
            return Err(NativeError::NotADirectory);
        }
        state.cwd = path;
        Ok(())
    }

    fn getcwd(&mut self) -> NativeResult<String> {
        Ok(self.state.lock().cwd.clone())
    }

    fn is_open(&self, fd: Fd) -> bool {
        usize::try_from(fd)
            .ok()
            .and_then(|idx| self.state.lock().files.get(idx).map(Option::is_some))
            .unwrap_or(false)
    }
}

/// Snapshot of a directory taken when the stream was opened
struct MemDirStream {
    entries: VecDeque<DirEntry>,
}

impl DirStream for MemDirStream {
    fn read_entry(&mut self) -> NativeResult<Option<DirEntry>> {
        Ok(self.entries.pop_front())
    }
}

// =============================================================================
// NETWORK
// =============================================================================

const EPHEMERAL_PORT_BASE: u16 = 49152;
const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Pipe {
    data: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug)]
struct PendingConnection {
    client: Endpoint,
    /// Client to server
    upstream: u64,
    /// Server to client
    downstream: u64,
}

#[derive(Debug)]
struct NetState {
    hosts: Vec<u32>,
    pipes: HashMap<u64, Pipe>,
    /// Connections waiting to be accepted, keyed by server endpoint
    pending: HashMap<Endpoint, VecDeque<PendingConnection>>,
    inboxes: HashMap<Endpoint, VecDeque<(Vec<u8>, Endpoint)>>,
    next_pipe: u64,
    next_port: u16,
    capacity: usize,
}

impl NetState {
    fn ephemeral_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = self.next_port.checked_add(1).unwrap_or(EPHEMERAL_PORT_BASE);
        port
    }

    fn new_pipe(&mut self) -> u64 {
        let id = self.next_pipe;
        self.next_pipe += 1;
        self.pipes.insert(id, Pipe::default());
        id
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<NetState>,
    arrivals: Condvar,
}

/// Loopback network connecting every attached host in-process
#[derive(Debug, Clone)]
pub struct LoopbackNet {
    shared: Arc<Shared>,
}

impl Default for LoopbackNet {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNet {
    pub fn new() -> Self {
        Self::with_buffer_capacity(DEFAULT_PIPE_CAPACITY)
    }

    /// Each direction of a stream buffers at most `capacity` bytes
    pub fn with_buffer_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(NetState {
                    hosts: Vec::new(),
                    pipes: HashMap::new(),
                    pending: HashMap::new(),
                    inboxes: HashMap::new(),
                    next_pipe: 0,
                    next_port: EPHEMERAL_PORT_BASE,
                    capacity,
                }),
                arrivals: Condvar::new(),
            }),
        }
    }

    /// Attach a host with address `ip` and open its network session
    pub fn attach(&self, ip: Ipv4Addr) -> Box<dyn NetworkManager> {
        let addr = u32::from(ip);
        {
            let mut state = self.shared.state.lock();
            if !state.hosts.contains(&addr) {
                state.hosts.push(addr);
            }
        }
        Box::new(LoopbackSession {
            shared: Arc::clone(&self.shared),
            addr,
        })
    }

    /// Connector that attaches `ip` when the session is first requested
    pub fn connector(&self, ip: Ipv4Addr) -> Box<dyn NetConnector> {
        let net = self.clone();
        Box::new(move |_service: &str| -> NativeResult<Box<dyn NetworkManager>> {
            Ok(net.attach(ip))
        })
    }
}

struct LoopbackSession {
    shared: Arc<Shared>,
    addr: u32,
}

impl NetworkManager for LoopbackSession {
    fn create_stream(&mut self) -> NativeResult<Box<dyn StreamSocket>> {
        Ok(Box::new(LoopbackStream {
            shared: Arc::clone(&self.shared),
            host: self.addr,
            local: None,
            remote: None,
            rx: None,
            tx: None,
        }))
    }

    fn create_datagram(&mut self) -> NativeResult<Box<dyn DatagramSocket>> {
        Ok(Box::new(LoopbackDatagram {
            shared: Arc::clone(&self.shared),
            host: self.addr,
            local: None,
            remote: None,
        }))
    }
}

struct LoopbackStream {
    shared: Arc<Shared>,
    host: u32,
    local: Option<Endpoint>,
    remote: Option<Endpoint>,
    rx: Option<u64>,
    tx: Option<u64>,
}

impl LoopbackStream {
    fn close_pipes(&mut self) {
        let mut state = self.shared.state.lock();
        for id in [self.rx.take(), self.tx.take()].into_iter().flatten() {
            if let Some(pipe) = state.pipes.get_mut(&id) {
                if pipe.closed {
                    state.pipes.remove(&id);
                } else {
                    pipe.closed = true;
                }
            }
        }
    }
}

impl StreamSocket for LoopbackStream {
    fn listen(&mut self, port: u16) -> NativeResult<()> {
        if self.remote.is_some() {
            return Err(NativeError::InvalidArgs);
        }
        self.local = Some(Endpoint::new(self.host, port));
        Ok(())
    }

    fn accept(&mut self) -> NativeResult<Endpoint> {
        let local = self.local.ok_or(NativeError::InvalidArgs)?;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(conn) = state.pending.get_mut(&local).and_then(VecDeque::pop_front) {
                self.rx = Some(conn.upstream);
                self.tx = Some(conn.downstream);
                self.remote = Some(conn.client);
                return Ok(conn.client);
            }
            if self
                .shared
                .arrivals
                .wait_for(&mut state, ACCEPT_TIMEOUT)
                .timed_out()
            {
                return Err(NativeError::Timeout);
            }
        }
    }

    fn connect(&mut self, remote: Endpoint) -> NativeResult<()> {
        if self.remote.is_some() {
            return Err(NativeError::InvalidArgs);
        }
        let mut state = self.shared.state.lock();
        if !state.hosts.contains(&remote.addr) {
            return Err(NativeError::ConnectionFailed);
        }
        let local = Endpoint::new(self.host, state.ephemeral_port());
        let upstream = state.new_pipe();
        let downstream = state.new_pipe();
        state
            .pending
            .entry(remote)
            .or_default()
            .push_back(PendingConnection {
                client: local,
                upstream,
                downstream,
            });
        self.local = Some(local);
        self.remote = Some(remote);
        self.tx = Some(upstream);
        self.rx = Some(downstream);
        self.shared.arrivals.notify_all();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> NativeResult<Option<usize>> {
        let tx = self.tx.ok_or(NativeError::NotConnected)?;
        let mut state = self.shared.state.lock();
        let capacity = state.capacity;
        let pipe = state.pipes.get_mut(&tx).ok_or(NativeError::SocketClosed)?;
        if pipe.closed {
            return Err(NativeError::SocketClosed);
        }
        let free = capacity.saturating_sub(pipe.data.len());
        if free == 0 && !data.is_empty() {
            return Ok(None);
        }
        let n = free.min(data.len());
        pipe.data.extend(&data[..n]);
        Ok(Some(n))
    }

    fn recv(&mut self, buf: &mut [u8]) -> NativeResult<Option<usize>> {
        let rx = self.rx.ok_or(NativeError::NotConnected)?;
        let mut state = self.shared.state.lock();
        let pipe = match state.pipes.get_mut(&rx) {
            Some(pipe) => pipe,
            None => return Ok(Some(0)),
        };
        if pipe.data.is_empty() {
            return Ok(if pipe.closed || buf.is_empty() {
                Some(0)
            } else {
                None
            });
        }
        let n = buf.len().min(pipe.data.len());
        for (dst, src) in buf.iter_mut().zip(pipe.data.drain(..n)) {
            *dst = src;
        }
        Ok(Some(n))
    }

    fn local_endpoint(&self) -> NativeResult<Endpoint> {
        Ok(self.local.unwrap_or_else(|| Endpoint::new(self.host, 0)))
    }

    fn remote_endpoint(&self) -> NativeResult<Endpoint> {
        self.remote.ok_or(NativeError::NotConnected)
    }

    fn abort(&mut self) -> NativeResult<()> {
        self.close_pipes();
        Ok(())
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        self.close_pipes();
    }
}

struct LoopbackDatagram {
    shared: Arc<Shared>,
    host: u32,
    local: Option<Endpoint>,
    remote: Option<Endpoint>,
}

impl LoopbackDatagram {
    fn bind_locked(&mut self, state: &mut NetState, port: u16) -> NativeResult<Endpoint> {
        if self.local.is_some() {
            return Err(NativeError::InvalidArgs);
        }
        let port = if port == 0 { state.ephemeral_port() } else { port };
        let local = Endpoint::new(self.host, port);
        if state.inboxes.contains_key(&local) {
            return Err(NativeError::Exists);
        }
        state.inboxes.insert(local, VecDeque::new());
        self.local = Some(local);
        Ok(local)
    }
}

impl DatagramSocket for LoopbackDatagram {
    fn bind(&mut self, port: u16) -> NativeResult<()> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        self.bind_locked(&mut state, port).map(|_| ())
    }

    fn connect(&mut self, remote: Endpoint) -> NativeResult<()> {
        self.remote = Some(remote);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> NativeResult<Option<usize>> {
        let remote = self.remote.ok_or(NativeError::NotConnected)?;
        self.send_to(data, remote)
    }

    fn send_to(&mut self, data: &[u8], dest: Endpoint) -> NativeResult<Option<usize>> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        let from = match self.local {
            Some(local) => local,
            None => self.bind_locked(&mut state, 0)?,
        };
        // Datagrams to nobody are lost
        if let Some(inbox) = state.inboxes.get_mut(&dest) {
            inbox.push_back((data.to_vec(), from));
        }
        Ok(Some(data.len()))
    }

    fn recv(&mut self, buf: &mut [u8]) -> NativeResult<Option<usize>> {
        Ok(self.recv_from(buf)?.map(|(n, _)| n))
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> NativeResult<Option<(usize, Endpoint)>> {
        let local = match self.local {
            Some(local) => local,
            None => return Ok(None),
        };
        let mut state = self.shared.state.lock();
        let inbox = state.inboxes.get_mut(&local).ok_or(NativeError::SocketClosed)?;
        Ok(inbox.pop_front().map(|(payload, from)| {
            let n = buf.len().min(payload.len());
            buf[..n].copy_from_slice(&payload[..n]);
            (n, from)
        }))
    }

    fn local_endpoint(&self) -> NativeResult<Endpoint> {
        Ok(self.local.unwrap_or_else(|| Endpoint::new(self.host, 0)))
    }

    fn remote_endpoint(&self) -> NativeResult<Endpoint> {
        self.remote.ok_or(NativeError::NotConnected)
    }
}

impl Drop for LoopbackDatagram {
    fn drop(&mut self) {
        if let Some(local) = self.local {
            self.shared.state.lock().inboxes.remove(&local);
        }
    }
}

// =============================================================================
// EVENT WAIT
// =============================================================================

#[derive(Debug, Default)]
struct BoardState {
    ready: BTreeMap<Fd, Interest>,
    /// `None` for an unbounded wait
    waits: Vec<Option<Duration>>,
}

/// Readiness board driven by the test
///
/// Wait-sets report whatever the board says is ready; waits never block
/// and are only recorded.
#[derive(Debug, Clone, Default)]
pub struct ReadyBoard {
    state: Arc<Mutex<BoardState>>,
}

impl ReadyBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, fd: Fd, interest: Interest) {
        self.state.lock().ready.insert(fd, interest);
    }

    pub fn clear(&self, fd: Fd) {
        self.state.lock().ready.remove(&fd);
    }

    /// Every wait performed so far
    pub fn waits(&self) -> Vec<Option<Duration>> {
        self.state.lock().waits.clone()
    }
}

impl EventWait for ReadyBoard {
    fn create_wait_set(&mut self) -> NativeResult<Box<dyn WaitSet>> {
        Ok(Box::new(BoardWaitSet {
            board: self.clone(),
            watched: BTreeMap::new(),
        }))
    }
}

struct BoardWaitSet {
    board: ReadyBoard,
    watched: BTreeMap<Fd, Interest>,
}

impl WaitSet for BoardWaitSet {
    fn add(&mut self, fd: Fd, interest: Interest) {
        self.watched.insert(fd, interest);
    }

    fn set(&mut self, fd: Fd, interest: Interest) {
        self.watched.insert(fd, interest);
    }

    fn remove(&mut self, fd: Fd) {
        self.watched.remove(&fd);
    }

    fn wait(&mut self) {
        self.board.state.lock().waits.push(None);
    }

    fn wait_for(&mut self, timeout: Duration) {
        self.board.state.lock().waits.push(Some(timeout));
    }

    fn for_each_ready(&mut self, f: &mut dyn FnMut(Fd, Interest)) {
        let ready: Vec<(Fd, Interest)> = {
            let board = self.board.state.lock();
            self.watched
                .iter()
                .filter_map(|(fd, want)| {
                    let have = board.ready.get(fd).copied()? & *want;
                    (!have.is_empty()).then_some((*fd, have))
                })
                .collect()
        };
        for (fd, interest) in ready {
            f(fd, interest);
        }
    }
}

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Environment with a manual clock and a captured debug channel
#[derive(Debug, Clone)]
pub struct ManualEnv {
    id: u32,
    clock: ManualClock,
    debug: Arc<Mutex<String>>,
}

impl ManualEnv {
    pub fn new(id: u32, clock: ManualClock) -> Self {
        Self {
            id,
            clock,
            debug: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Everything written to the debug channel so far
    pub fn debug_output(&self) -> String {
        self.debug.lock().clone()
    }

    pub fn debug_lines(&self) -> Vec<String> {
        self.debug.lock().lines().map(str::to_string).collect()
    }
}

impl Environment for ManualEnv {
    fn activity_id(&self) -> u32 {
        self.id
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn sleep_for(&mut self, duration: Duration) {
        self.clock.advance(duration);
    }

    fn debug_write(&mut self, line: &str) {
        self.debug.lock().push_str(line);
    }
}

// =============================================================================
// BUNDLE
// =============================================================================

/// A complete in-memory runtime for one activity
#[derive(Debug, Clone)]
pub struct MemoryRuntime {
    pub fs: MemFs,
    pub board: ReadyBoard,
    pub env: ManualEnv,
    pub net: LoopbackNet,
    pub ip: Ipv4Addr,
}

impl MemoryRuntime {
    /// Runtime for activity `id` on its own loopback network
    pub fn new(id: u32, max_fds: usize) -> Self {
        Self::on_network(id, max_fds, LoopbackNet::new(), Ipv4Addr::new(127, 0, 0, 1))
    }

    /// Runtime for activity `id` attached to an existing network as `ip`
    pub fn on_network(id: u32, max_fds: usize, net: LoopbackNet, ip: Ipv4Addr) -> Self {
        let clock = ManualClock::new();
        Self {
            fs: MemFs::with_clock(max_fds, clock.clone()),
            board: ReadyBoard::new(),
            env: ManualEnv::new(id, clock),
            net,
            ip,
        }
    }

    /// Collaborators sharing this runtime's state
    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            Box::new(self.fs.clone()),
            Box::new(self.board.clone()),
            Box::new(self.env.clone()),
        )
        .with_network(self.net.connector(self.ip))
    }
}
