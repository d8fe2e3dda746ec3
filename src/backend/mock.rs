//! In-memory image backend
//!
//! Images are plain maps from absolute path to file node. Step Dockerfiles
//! are interpreted directly: `ENV`, `WORKDIR` and `USER` edit the image
//! config, `COPY` reads from the submitted context archive, and `RUN`
//! understands the commands the builder emits (`mkdir -p`, `pip install -r`,
//! `adduser`, `useradd`, alternatives joined with `||`). Anything else runs
//! as a no-op.

use super::{
    BackendError, ImageBackend, ImageDetails, PullPolicy, ResolvedImage, StepOutput, StepRequest,
};
use crate::context::{BuildContext, ContextEntry};
use crate::digest::Digest;
use crate::identity::PasswdDb;
use crate::pipeline::BuildStage;
use crate::plan::Instruction;
use crate::recipe::{DependencyManifest, ImageRef};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

pub const SITE_PACKAGES: &str = "/usr/local/lib/python3/site-packages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockNode {
    Dir,
    File { data: Vec<u8>, mode: u32 },
    Symlink(String),
}

/// Filesystem and config of a base image published in the mock registry
#[derive(Debug, Clone, Default)]
pub struct MockImage {
    fs: BTreeMap<String, MockNode>,
    user: Option<String>,
    working_dir: Option<String>,
    env: Vec<(String, String)>,
}

impl MockImage {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Alpine-style image with busybox `adduser`
    pub fn alpine() -> Self {
        Self::empty()
            .with_file("/etc/os-release", "ID=alpine\nVERSION_ID=3.19.1\nPRETTY_NAME=\"Alpine Linux v3.19\"\n")
            .with_file(
                "/etc/passwd",
                "root:x:0:0:root:/root:/bin/ash\nbin:x:1:1:bin:/bin:/sbin/nologin\ndaemon:x:2:2:daemon:/sbin:/sbin/nologin\nnobody:x:65534:65534:nobody:/:/sbin/nologin\n",
            )
            .with_executable("/bin/busybox")
            .with_executable("/usr/local/bin/python3")
            .with_executable("/usr/local/bin/pip")
            .with_env("PATH", "/usr/local/bin:/usr/local/sbin:/usr/sbin:/usr/bin:/sbin:/bin")
    }

    /// Debian-style image with shadow-utils `useradd`
    pub fn debian() -> Self {
        Self::empty()
            .with_file("/etc/os-release", "ID=debian\nVERSION_ID=\"12\"\n")
            .with_file(
                "/etc/passwd",
                "root:x:0:0:root:/root:/bin/bash\ndaemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\nnobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin\n",
            )
            .with_executable("/usr/sbin/useradd")
            .with_executable("/usr/local/bin/python3")
            .with_executable("/usr/local/bin/pip")
            .with_env("PATH", "/usr/local/bin:/usr/local/sbin:/usr/sbin:/usr/bin:/sbin:/bin")
    }

    pub fn with_file(mut self, path: &str, contents: impl AsRef<[u8]>) -> Self {
        let _ = write_file(&mut self.fs, path, contents.as_ref().to_vec(), 0o644);
        self
    }

    pub fn with_executable(mut self, path: &str) -> Self {
        let _ = write_file(&mut self.fs, path, Vec::new(), 0o755);
        self
    }

    /// Adds `name` to `/etc/passwd`
    pub fn with_account(self, name: &str, uid: u32) -> Self {
        let mut passwd = match self.fs.get("/etc/passwd") {
            Some(MockNode::File { data, .. }) => String::from_utf8_lossy(data).into_owned(),
            _ => String::new(),
        };
        passwd.push_str(&PasswdDb::entry_line(name, uid));
        passwd.push('\n');
        self.with_file("/etc/passwd", passwd)
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        set_env(&mut self.env, key, value);
        self
    }

    fn content_id(&self, seed: &str) -> String {
        let mut parts = vec![seed.to_string()];
        for (path, node) in &self.fs {
            let node = match node {
                MockNode::Dir => "d".to_string(),
                MockNode::File { data, mode } => format!("f{:o}{}", mode, Digest::of_bytes(data)),
                MockNode::Symlink(target) => format!("l{}", target),
            };
            parts.push(format!("{}={}", path, node));
        }
        for (key, value) in &self.env {
            parts.push(format!("env:{}={}", key, value));
        }
        format!("sha256:{}", Digest::chain(&parts).hash())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBuildCall {
    pub stage: BuildStage,
    pub parent: String,
    pub dockerfile: String,
    pub image_id: String,
    pub cached: bool,
}

#[derive(Default)]
struct MockState {
    registry: HashMap<String, MockImage>,
    images: HashMap<String, MockImage>,
    refs: HashMap<String, String>,
    rejected_packages: HashSet<String>,
    failures: HashMap<BuildStage, String>,
    build_calls: Vec<MockBuildCall>,
    pulls: Vec<String>,
    tags: Vec<(String, String)>,
}

pub struct MockBackend {
    state: Mutex<MockState>,
    step_delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            step_delay: None,
        }
    }

    /// Publishes an image in the mock registry; it must be pulled before use
    pub fn with_remote_image(self, reference: &str, image: MockImage) -> Self {
        self.state
            .lock()
            .unwrap()
            .registry
            .insert(reference.to_string(), image);
        self
    }

    /// Makes an image available locally without a pull
    pub fn with_local_image(self, reference: &str, image: MockImage) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = image.content_id(reference);
            state.images.insert(id.clone(), image);
            state.refs.insert(reference.to_string(), id);
        }
        self
    }

    /// `pip install` of this package fails as if no index carried it
    pub fn reject_package(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejected_packages
            .insert(normalize_package(name));
        self
    }

    /// Every build of `stage` fails with `message`
    pub fn fail_stage(self, stage: BuildStage, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(stage, message.to_string());
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn build_calls(&self) -> Vec<MockBuildCall> {
        self.state.lock().unwrap().build_calls.clone()
    }

    /// Build calls for `stage` that actually executed instructions
    pub fn executed(&self, stage: BuildStage) -> usize {
        self.state
            .lock()
            .unwrap()
            .build_calls
            .iter()
            .filter(|c| c.stage == stage && !c.cached)
            .count()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.state.lock().unwrap().pulls.clone()
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().tags.clone()
    }

    /// Image id a tag or reference points to
    pub fn lookup(&self, reference: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        find_image_id(&state, reference)
    }

    pub fn remove_image(&self, image: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = find_image_id(&state, image) {
            state.images.remove(&id);
            state.refs.retain(|_, target| *target != id);
        }
    }

    /// Relative paths of every entry below `dir` in `image`
    pub fn files_under(&self, image: &str, dir: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        let id = find_image_id(&state, image)?;
        let image = state.images.get(&id)?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Some(
            image
                .fs
                .keys()
                .filter_map(|path| path.strip_prefix(&prefix))
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn file(&self, image: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let id = find_image_id(&state, image)?;
        match state.images.get(&id)?.fs.get(path) {
            Some(MockNode::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Normalized names of packages `pip install` placed in the image
    pub fn installed_packages(&self, image: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .files_under(image, SITE_PACKAGES)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.strip_suffix(".dist-info").map(str::to_string))
            .collect();
        names.sort();
        names
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn find_image_id(state: &MockState, reference: &str) -> Option<String> {
    if state.images.contains_key(reference) {
        return Some(reference.to_string());
    }
    state.refs.get(reference).cloned()
}

fn normalize_package(name: &str) -> String {
    DependencyManifest::parse(name.as_bytes())
        .ok()
        .and_then(|m| m.packages.first().map(|p| p.normalized_name()))
        .unwrap_or_else(|| name.to_ascii_lowercase())
}

fn set_env(env: &mut Vec<(String, String)>, key: &str, value: &str) {
    match env.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => env.push((key.to_string(), value.to_string())),
    }
}

fn normalize_path(workdir: Option<&str>, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir.unwrap_or("/"), path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn mkdir_p(fs: &mut BTreeMap<String, MockNode>, path: &str) -> Result<(), String> {
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        match fs.get(&current) {
            None => {
                fs.insert(current.clone(), MockNode::Dir);
            }
            Some(MockNode::Dir) | Some(MockNode::Symlink(_)) => {}
            Some(MockNode::File { .. }) => {
                return Err(format!(
                    "mkdir: can't create directory '{}': File exists",
                    current
                ))
            }
        }
    }
    Ok(())
}

fn write_file(
    fs: &mut BTreeMap<String, MockNode>,
    path: &str,
    data: Vec<u8>,
    mode: u32,
) -> Result<(), String> {
    if let Some((parent, _)) = path.rsplit_once('/') {
        mkdir_p(fs, parent)?;
    }
    if matches!(fs.get(path), Some(MockNode::Dir)) {
        return Err(format!("cannot overwrite directory '{}' with a file", path));
    }
    fs.insert(path.to_string(), MockNode::File { data, mode });
    Ok(())
}

/// Applies one step's instructions to a copy of the parent image
struct StepRun<'a> {
    image: MockImage,
    context: &'a BuildContext,
    rejected: &'a HashSet<String>,
    log: Vec<String>,
}

impl<'a> StepRun<'a> {
    fn apply(&mut self, instruction: &Instruction) -> Result<(), String> {
        match instruction {
            Instruction::From { .. } => Err("multi-stage builds are not supported".to_string()),
            Instruction::Env { vars } => {
                for (key, value) in vars {
                    set_env(&mut self.image.env, key, value);
                }
                Ok(())
            }
            Instruction::Workdir { path } => {
                let path = normalize_path(self.image.working_dir.as_deref(), path);
                mkdir_p(&mut self.image.fs, &path)?;
                self.image.working_dir = Some(path);
                Ok(())
            }
            Instruction::User { name } => {
                self.image.user = Some(name.clone());
                Ok(())
            }
            Instruction::Copy { src, dest } => self.copy(src, dest),
            Instruction::Run { command } => self.run(command),
        }
    }

    fn copy(&mut self, src: &str, dest: &str) -> Result<(), String> {
        let dest_path = normalize_path(self.image.working_dir.as_deref(), dest);
        let not_found = || format!("COPY failed: file not found in build context: {}", src);

        match self.context.get(src) {
            Some(ContextEntry::Dir) => {
                mkdir_p(&mut self.image.fs, &dest_path)?;
                let entries: Vec<(String, ContextEntry)> = self
                    .context
                    .entries_under(src)
                    .map(|(p, e)| (p.to_string(), e.clone()))
                    .collect();
                for (relative, entry) in entries {
                    let target = format!("{}/{}", dest_path.trim_end_matches('/'), relative);
                    match entry {
                        ContextEntry::Dir => mkdir_p(&mut self.image.fs, &target)?,
                        ContextEntry::File { data, mode } => {
                            write_file(&mut self.image.fs, &target, data, mode)?
                        }
                        ContextEntry::Symlink(link) => {
                            self.image.fs.insert(target, MockNode::Symlink(link));
                        }
                    }
                }
                Ok(())
            }
            Some(ContextEntry::File { data, mode }) => {
                let target = if dest.ends_with('/') {
                    let name = src.rsplit('/').next().unwrap_or(src);
                    format!("{}/{}", dest_path.trim_end_matches('/'), name)
                } else {
                    dest_path
                };
                write_file(&mut self.image.fs, &target, data.clone(), *mode)
            }
            Some(ContextEntry::Symlink(_)) | None => Err(not_found()),
        }
    }

    fn run(&mut self, command: &str) -> Result<(), String> {
        let mut last_error = None;
        for alternative in command.split("||") {
            let alternative = alternative.replace("2>/dev/null", "");
            let snapshot = self.image.clone();
            match self.run_simple(alternative.trim()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.image = snapshot;
                    self.log.push(e.clone());
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| "empty command".to_string()))
    }

    fn has_binary(&self, name: &str) -> bool {
        ["/bin", "/sbin", "/usr/bin", "/usr/sbin", "/usr/local/bin"]
            .iter()
            .any(|dir| self.image.fs.contains_key(&format!("{}/{}", dir, name)))
    }

    fn run_simple(&mut self, command: &str) -> Result<(), String> {
        let args: Vec<&str> = command.split_whitespace().collect();
        match args.as_slice() {
            ["mkdir", "-p", paths @ ..] => {
                for path in paths {
                    let path = normalize_path(self.image.working_dir.as_deref(), path);
                    mkdir_p(&mut self.image.fs, &path)?;
                }
                Ok(())
            }
            ["pip", rest @ ..] | ["pip3", rest @ ..] if rest.first() == Some(&"install") => {
                self.pip_install(rest)
            }
            ["adduser", rest @ ..] => {
                if !self.has_binary("busybox") {
                    return Err("adduser: unrecognized option '-D'".to_string());
                }
                let uid = flag_value(rest, "-u")?;
                let name = rest.last().ok_or("adduser: missing user name")?;
                self.add_account(name, uid, "adduser: user '{}' in use")
            }
            ["useradd", rest @ ..] => {
                if !self.has_binary("useradd") {
                    return Err("/bin/sh: useradd: not found".to_string());
                }
                let uid = flag_value(rest, "--uid")?;
                let name = rest.last().ok_or("useradd: missing user name")?;
                self.add_account(name, uid, "useradd: user '{}' already exists")
            }
            _ => {
                self.log.push(format!("(mock) skipped: {}", command));
                Ok(())
            }
        }
    }

    fn pip_install(&mut self, args: &[&str]) -> Result<(), String> {
        let manifest_path = args
            .iter()
            .position(|a| *a == "-r")
            .and_then(|i| args.get(i + 1))
            .ok_or("pip: only 'install -r <file>' is supported")?;
        let manifest_path = normalize_path(self.image.working_dir.as_deref(), manifest_path);

        let raw = match self.image.fs.get(&manifest_path) {
            Some(MockNode::File { data, .. }) => data.clone(),
            _ => {
                return Err(format!(
                    "ERROR: Could not open requirements file: [Errno 2] No such file or directory: '{}'",
                    manifest_path
                ))
            }
        };
        let manifest = DependencyManifest::parse(&raw)
            .map_err(|e| format!("ERROR: Invalid requirement: {}", e))?;

        for requirement in &manifest.opaque {
            if !requirement.is_location() {
                return Err(format!(
                    "ERROR: Invalid requirement: '{}' (from line {} of {})",
                    requirement.content, requirement.line, manifest_path
                ));
            }
        }
        for package in &manifest.packages {
            if self.rejected.contains(&package.normalized_name()) {
                return Err(format!(
                    "ERROR: Could not find a version that satisfies the requirement {}\nERROR: No matching distribution found for {}",
                    package.name, package.name
                ));
            }
        }
        for package in &manifest.packages {
            let metadata = format!(
                "Name: {}\nRequested: {}\n",
                package.name,
                package.constraint.as_deref().unwrap_or("*")
            );
            write_file(
                &mut self.image.fs,
                &format!("{}/{}.dist-info/METADATA", SITE_PACKAGES, package.normalized_name()),
                metadata.into_bytes(),
                0o644,
            )?;
            self.log
                .push(format!("Successfully installed {}", package.name));
        }
        for requirement in &manifest.opaque {
            self.log.push(format!("Processing {}", requirement.content));
        }
        Ok(())
    }

    fn add_account(&mut self, name: &str, uid: Option<u32>, taken: &str) -> Result<(), String> {
        let mut passwd = match self.image.fs.get("/etc/passwd") {
            Some(MockNode::File { data, .. }) => String::from_utf8_lossy(data).into_owned(),
            _ => String::new(),
        };
        let db = PasswdDb::parse(&passwd);
        if db.find(name).is_some() {
            return Err(taken.replace("{}", name));
        }
        if let Some(uid) = uid {
            if db.find_uid(uid).is_some() {
                return Err(format!("uid '{}' already exists", uid));
            }
        }
        let uid = uid.unwrap_or_else(|| db.next_free_uid());
        if !passwd.is_empty() && !passwd.ends_with('\n') {
            passwd.push('\n');
        }
        passwd.push_str(&PasswdDb::entry_line(name, uid));
        passwd.push('\n');
        write_file(&mut self.image.fs, "/etc/passwd", passwd.into_bytes(), 0o644)
    }
}

fn flag_value(args: &[&str], flag: &str) -> Result<Option<u32>, String> {
    match args.iter().position(|a| *a == flag) {
        Some(i) => args
            .get(i + 1)
            .and_then(|v| v.parse().ok())
            .map(Some)
            .ok_or_else(|| format!("invalid value for {}", flag)),
        None => Ok(None),
    }
}

fn export_tar(image: &MockImage, dir: &str) -> Result<Vec<u8>, BackendError> {
    let dir = dir.trim_end_matches('/');
    let root_name = dir.rsplit('/').next().unwrap_or(dir);
    let prefix = format!("{}/", dir);

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    builder.append_data(&mut header, format!("{}/", root_name), std::io::empty())?;

    for (path, node) in image.fs.range(prefix.clone()..) {
        let relative = match path.strip_prefix(&prefix) {
            Some(relative) => relative,
            None => break,
        };
        let name = format!("{}/{}", root_name, relative);
        let mut header = tar::Header::new_gnu();
        match node {
            MockNode::Dir => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, format!("{}/", name), std::io::empty())?;
            }
            MockNode::File { data, mode } => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, name, data.as_slice())?;
            }
            MockNode::Symlink(target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, name, target)?;
            }
        }
    }
    Ok(builder.into_inner()?)
}

#[async_trait]
impl ImageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(
        &self,
        reference: &ImageRef,
        policy: PullPolicy,
    ) -> Result<ResolvedImage, BackendError> {
        let key = reference.to_string();
        let mut state = self.state.lock().unwrap();
        let present = state.refs.contains_key(&key);

        let pulled = match (policy, present) {
            (PullPolicy::Never, false) => return Err(BackendError::ImageNotFound(key)),
            (PullPolicy::Always, _) | (PullPolicy::Missing, false) => {
                let image = state
                    .registry
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| BackendError::ImageNotFound(key.clone()))?;
                let id = image.content_id(&key);
                state.images.insert(id.clone(), image);
                state.refs.insert(key.clone(), id);
                state.pulls.push(key.clone());
                true
            }
            (_, true) => false,
        };

        let id = state
            .refs
            .get(&key)
            .cloned()
            .ok_or_else(|| BackendError::ImageNotFound(key.clone()))?;
        Ok(ResolvedImage {
            reference: key,
            id,
            pulled,
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(find_image_id(&state, image).is_some())
    }

    async fn read_file(&self, image: &str, path: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let state = self.state.lock().unwrap();
        let id = find_image_id(&state, image)
            .ok_or_else(|| BackendError::ImageNotFound(image.to_string()))?;
        Ok(match state.images.get(&id).and_then(|i| i.fs.get(path)) {
            Some(MockNode::File { data, .. }) => Some(data.clone()),
            _ => None,
        })
    }

    async fn build_step(&self, request: StepRequest) -> Result<StepOutput, BackendError> {
        if let Some(delay) = self.step_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.failures.get(&request.stage) {
            return Err(BackendError::StepFailed {
                message: message.clone(),
                log: Vec::new(),
            });
        }

        let context = BuildContext::from_archive(&request.context)?;
        let dockerfile = context
            .dockerfile()
            .ok_or_else(|| BackendError::Engine("build context has no Dockerfile".to_string()))?
            .to_string();

        let mut lines = dockerfile
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));
        let parent_ref = match lines.next().map(Instruction::parse) {
            Some(Ok(Instruction::From { image })) => image,
            _ => {
                return Err(BackendError::StepFailed {
                    message: "Dockerfile must start with FROM".to_string(),
                    log: Vec::new(),
                })
            }
        };
        let parent_id = find_image_id(&state, &parent_ref).ok_or_else(|| {
            BackendError::StepFailed {
                message: format!("pull access denied for {}", parent_ref),
                log: Vec::new(),
            }
        })?;

        let instructions = lines
            .map(Instruction::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BackendError::StepFailed {
                message: e.to_string(),
                log: Vec::new(),
            })?;

        let context_digest = Digest::of_bytes(&context.to_tar()?).to_string();
        let image_id = format!(
            "sha256:{}",
            Digest::chain([
                parent_id.as_str(),
                dockerfile.as_str(),
                context_digest.as_str()
            ])
            .hash()
        );
        let cached = !request.no_cache && state.images.contains_key(&image_id);

        let mut log = Vec::new();
        if !cached {
            let parent = state
                .images
                .get(&parent_id)
                .cloned()
                .ok_or_else(|| BackendError::ImageNotFound(parent_id.clone()))?;
            let mut run = StepRun {
                image: parent,
                context: &context,
                rejected: &state.rejected_packages,
                log: Vec::new(),
            };
            for (index, instruction) in instructions.iter().enumerate() {
                run.log
                    .push(format!("Step {}/{} : {}", index + 2, instructions.len() + 1, instruction));
                if let Err(message) = run.apply(instruction) {
                    let log = run.log;
                    return Err(BackendError::StepFailed { message, log });
                }
            }
            log = run.log;
            let image = run.image;
            state.images.insert(image_id.clone(), image);
        } else {
            log.push(" ---> Using cache".to_string());
        }

        state.build_calls.push(MockBuildCall {
            stage: request.stage,
            parent: parent_id,
            dockerfile,
            image_id: image_id.clone(),
            cached,
        });

        Ok(StepOutput {
            image_id,
            cached,
            log,
        })
    }

    async fn tag(&self, image: &str, tag: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        let id = find_image_id(&state, image)
            .ok_or_else(|| BackendError::ImageNotFound(image.to_string()))?;
        state.refs.insert(tag.to_string(), id.clone());
        state.tags.push((id, tag.to_string()));
        Ok(())
    }

    async fn inspect(&self, image: &str) -> Result<ImageDetails, BackendError> {
        let state = self.state.lock().unwrap();
        let id = find_image_id(&state, image)
            .ok_or_else(|| BackendError::ImageNotFound(image.to_string()))?;
        let found = state
            .images
            .get(&id)
            .ok_or_else(|| BackendError::ImageNotFound(image.to_string()))?;
        let mut tags: Vec<String> = state
            .refs
            .iter()
            .filter(|(_, target)| **target == id)
            .map(|(name, _)| name.clone())
            .collect();
        tags.sort();

        Ok(ImageDetails {
            id: id.clone(),
            user: found.user.clone(),
            working_dir: found.working_dir.clone(),
            env: found
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            tags,
        })
    }

    async fn export_dir(&self, image: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let state = self.state.lock().unwrap();
        let id = find_image_id(&state, image)
            .ok_or_else(|| BackendError::ImageNotFound(image.to_string()))?;
        let found = state
            .images
            .get(&id)
            .ok_or_else(|| BackendError::ImageNotFound(image.to_string()))?;
        if !matches!(found.fs.get(path.trim_end_matches('/')), Some(MockNode::Dir)) {
            return Err(BackendError::Engine(format!(
                "{} does not exist in {}",
                path, image
            )));
        }
        export_tar(found, path)
    }
}
