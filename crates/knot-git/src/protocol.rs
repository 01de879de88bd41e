//! Git smart HTTP protocol implementation.
//!
//! Implements ref advertisement, fetch negotiation and push for the
//! stateless-rpc flavour of protocol v0 that git speaks over HTTP.
//! See: https://git-scm.com/docs/http-protocol
//!
//! Everything here is transport-agnostic: bytes in, bytes out.

use crate::pack::{PackBuilder, PackParser, PACK_SIGNATURE};
use crate::pktline::{split_pkt, Band, PktLine, PktLineReader, PktLineWriter, SideBand};
use crate::{GitError, Result};
use knot_storage::{
    validate_branch_name, ObjectId, ObjectType, RepoHandle, StorageError, HEADS_PREFIX,
};
use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Default agent advertised to clients.
pub const DEFAULT_AGENT: &str = concat!("knot/", env!("CARGO_PKG_VERSION"));

/// Default bound on commits counted per pushed ref.
pub const DEFAULT_MAX_PUSH_COMMITS: usize = 10_000;

/// Capabilities advertised on the first ref line.
pub fn capabilities(agent: &str) -> String {
    format!(
        "report-status delete-refs side-band-64k quiet ofs-delta agent={}",
        agent
    )
}

/// The two services git runs over smart HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Fetch and clone.
    UploadPack,
    /// Push.
    ReceivePack,
}

impl Service {
    /// Wire name, e.g. `git-upload-pack`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Content type of the `info/refs` response.
    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-advertisement",
            Self::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Content type of the service response.
    pub fn result_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-result",
            Self::ReceivePack => "application/x-git-receive-pack-result",
        }
    }
}

impl FromStr for Service {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "git-upload-pack" => Ok(Self::UploadPack),
            "git-receive-pack" => Ok(Self::ReceivePack),
            other => Err(GitError::MalformedRequest(format!("unknown service: {}", other))),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advertises references to a client.
pub fn advertise_refs<W: Write>(
    writer: &mut W,
    repo: &RepoHandle,
    service: Service,
    agent: &str,
) -> Result<()> {
    let mut pkt_writer = PktLineWriter::new(writer);

    pkt_writer.write_line(&format!("# service={}", service))?;
    pkt_writer.flush_pkt()?;

    let mut refs = Vec::new();
    let mut caps = capabilities(agent);
    if service == Service::UploadPack {
        if let Some(head) = repo.head() {
            refs.push((head, "HEAD".to_string()));
            caps.push_str(&format!(" symref=HEAD:{}{}", HEADS_PREFIX, repo.default_branch));
        }
    }
    refs.extend(
        repo.refs
            .get_refs(&repo.id)
            .into_iter()
            .map(|(name, id)| (id, name)),
    );

    match refs.split_first() {
        None => {
            pkt_writer.write_line(&format!("{} capabilities^{{}}\0{}", ObjectId::ZERO, caps))?;
        }
        Some(((id, name), rest)) => {
            pkt_writer.write_line(&format!("{} {}\0{}", id, name, caps))?;
            for (id, name) in rest {
                pkt_writer.write_line(&format!("{} {}", id, name))?;
            }
        }
    }

    pkt_writer.flush_pkt()?;
    pkt_writer.flush()?;

    tracing::debug!(repo = %repo.id.short(), service = %service, refs = refs.len(), "advertised refs");
    Ok(())
}

/// Parses a 40-hex id from a protocol line.
fn parse_id(hex: &str, line: &str) -> Result<ObjectId> {
    ObjectId::from_hex(hex)
        .map_err(|_| GitError::MalformedRequest(format!("invalid object id in {:?}", line)))
}

/// Want/Have negotiation for upload-pack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WantHave {
    /// Object IDs the client wants.
    pub wants: Vec<ObjectId>,
    /// Object IDs the client has.
    pub haves: Vec<ObjectId>,
    /// Capabilities from the first want line.
    pub capabilities: Vec<String>,
    /// Whether the client finished negotiating.
    pub done: bool,
}

impl WantHave {
    /// Parses want/have lines from the client.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut pkt_reader = PktLineReader::new(reader);
        let mut request = Self::default();

        while let Some(pkt) = pkt_reader.read()? {
            let Some(line) = pkt.as_str() else {
                if pkt.data().is_some() {
                    return Err(GitError::MalformedRequest("request line is not utf-8".to_string()));
                }
                continue;
            };

            let mut words = line.split(' ');
            match words.next() {
                Some("want") => {
                    let id = parse_id(words.next().unwrap_or_default(), line)?;
                    if request.wants.is_empty() {
                        request.capabilities = words.map(str::to_string).collect();
                    }
                    request.wants.push(id);
                }
                Some("have") => request.haves.push(parse_id(words.next().unwrap_or_default(), line)?),
                Some("done") => {
                    request.done = true;
                    break;
                }
                // shallow, deepen and filter lines ask for features we do not offer
                _ => {}
            }
        }

        Ok(request)
    }

    /// Side-band variant the client asked for.
    pub fn sideband(&self) -> Option<SideBand> {
        SideBand::from_capabilities(self.capabilities.iter().map(String::as_str))
    }
}

/// What an upload-pack request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The client wanted nothing; only `NAK` was sent.
    NothingWanted,
    /// The client is still sending haves; only `NAK` was sent.
    Negotiating,
    /// A want named an object the server does not have.
    UnknownWant(ObjectId),
    /// A pack was sent.
    Packed {
        /// Objects in the pack.
        objects: usize,
        /// Pack size in bytes.
        bytes: usize,
    },
}

/// Objects reachable from `wants` but not from any known `have`, ordered
/// commits, tags, trees, blobs, each by id.
pub fn objects_to_send(
    repo: &RepoHandle,
    wants: &[ObjectId],
    haves: &[ObjectId],
) -> Result<PackBuilder> {
    let store = &repo.objects;
    let mut known_haves = Vec::new();
    for have in haves {
        if store.contains(have)? {
            known_haves.push(*have);
        }
    }
    let common = store.reachable_closure(known_haves, &HashSet::new())?.objects;
    let wanted = store.reachable_closure(wants.iter().copied(), &common)?.objects;

    let mut objects = Vec::with_capacity(wanted.len());
    for id in &wanted {
        let object = store
            .get_object(id)?
            .ok_or_else(|| GitError::ObjectNotFound(id.to_hex()))?;
        objects.push(object);
    }
    objects.sort_by(|a, b| (a.object_type, a.id).cmp(&(b.object_type, b.id)));

    let mut builder = PackBuilder::new();
    for object in objects {
        builder.add(object);
    }
    Ok(builder)
}

/// Handles git-upload-pack (fetch/clone).
pub fn upload_pack<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    repo: &RepoHandle,
) -> Result<FetchOutcome> {
    let request = WantHave::parse(reader)?;
    let mut pkt_writer = PktLineWriter::new(writer);

    if request.wants.is_empty() {
        pkt_writer.write_line("NAK")?;
        pkt_writer.flush()?;
        return Ok(FetchOutcome::NothingWanted);
    }

    for want in &request.wants {
        if !repo.objects.contains(want)? {
            tracing::info!(repo = %repo.id.short(), want = %want, "client wants unknown object");
            pkt_writer.write_line(&format!("ERR upload-pack: not our ref {}", want))?;
            pkt_writer.flush()?;
            return Ok(FetchOutcome::UnknownWant(*want));
        }
    }

    // Without `done` the client expects another round. We never ACK, so it
    // keeps sending haves until it gives up and sends `done`.
    if !request.done && !request.haves.is_empty() {
        pkt_writer.write_line("NAK")?;
        pkt_writer.flush()?;
        return Ok(FetchOutcome::Negotiating);
    }

    let builder = objects_to_send(repo, &request.wants, &request.haves)?;
    let objects = builder.len();
    let pack = builder.build()?;

    pkt_writer.write_line("NAK")?;
    match request.sideband() {
        Some(variant) => {
            pkt_writer.write_sideband(Band::Data, &pack, variant)?;
            pkt_writer.flush_pkt()?;
        }
        None => pkt_writer.write_raw(&pack)?,
    }
    pkt_writer.flush()?;

    tracing::info!(
        repo = %repo.id.short(),
        wants = request.wants.len(),
        haves = request.haves.len(),
        objects,
        bytes = pack.len(),
        "served fetch"
    );
    Ok(FetchOutcome::Packed {
        objects,
        bytes: pack.len(),
    })
}

/// A ref update command from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Old object ID (zeros for create).
    pub old_id: ObjectId,
    /// New object ID (zeros for delete).
    pub new_id: ObjectId,
    /// Reference name.
    pub ref_name: String,
}

impl Command {
    /// Parses `<old> <new> <ref>`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.splitn(3, ' ');
        let (Some(old), Some(new), Some(ref_name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(GitError::MalformedRequest(format!("malformed command {:?}", line)));
        };
        if ref_name.is_empty() {
            return Err(GitError::MalformedRequest(format!("command without ref {:?}", line)));
        }
        Ok(Self {
            old_id: parse_id(old, line)?,
            new_id: parse_id(new, line)?,
            ref_name: ref_name.to_string(),
        })
    }

    /// Checks if this is a create command.
    pub fn is_create(&self) -> bool {
        self.old_id.is_zero()
    }

    /// Checks if this is a delete command.
    pub fn is_delete(&self) -> bool {
        self.new_id.is_zero()
    }

    /// Branch name for `refs/heads/*` refs.
    pub fn branch_name(&self) -> Option<&str> {
        self.ref_name.strip_prefix(HEADS_PREFIX)
    }
}

/// A parsed receive-pack request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest<'a> {
    /// Ref updates in request order.
    pub commands: Vec<Command>,
    /// Capabilities from the first command line.
    pub capabilities: Vec<String>,
    /// Pack section, empty for delete-only pushes.
    pub pack: &'a [u8],
}

impl<'a> ReceiveRequest<'a> {
    /// Splits commands from the pack at the flush or at the first `PACK`.
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        let mut commands = Vec::new();
        let mut capabilities = Vec::new();
        let mut rest = body;

        while !rest.is_empty() && !rest.starts_with(PACK_SIGNATURE) {
            let (pkt, tail) = split_pkt(rest)?;
            rest = tail;
            let line = match &pkt {
                PktLine::Flush => break,
                PktLine::Data(_) => pkt
                    .as_str()
                    .ok_or_else(|| GitError::MalformedRequest("command is not utf-8".to_string()))?,
                _ => continue,
            };

            let line = match line.split_once('\0') {
                Some((command, caps)) => {
                    if commands.is_empty() {
                        capabilities = caps.split_whitespace().map(str::to_string).collect();
                    }
                    command
                }
                None => line,
            };
            // Push certificates and shallow lines are not supported.
            if line.starts_with("shallow ") || line.starts_with("push-cert") {
                continue;
            }
            commands.push(Command::parse(line)?);
        }

        Ok(Self {
            commands,
            capabilities,
            pack: rest,
        })
    }

    /// Side-band variant the client asked for.
    pub fn sideband(&self) -> Option<SideBand> {
        SideBand::from_capabilities(self.capabilities.iter().map(String::as_str))
    }
}

/// Outcome of one ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefStatus {
    /// Applied.
    Ok,
    /// Rejected with a reason.
    Rejected(String),
}

/// Per-ref result of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    /// The command as sent.
    pub command: Command,
    /// Applied or rejected.
    pub status: RefStatus,
    /// Commits the update introduced.
    pub commit_count: usize,
    /// First line of the new tip's message.
    pub summary: Option<String>,
}

impl RefUpdate {
    fn rejected(command: &Command, reason: impl Into<String>) -> Self {
        Self {
            command: command.clone(),
            status: RefStatus::Rejected(reason.into()),
            commit_count: 0,
            summary: None,
        }
    }

    /// Returns true if the update was applied.
    pub fn is_ok(&self) -> bool {
        self.status == RefStatus::Ok
    }

    /// Report-status line for this ref.
    pub fn status_line(&self) -> String {
        match &self.status {
            RefStatus::Ok => format!("ok {}", self.command.ref_name),
            RefStatus::Rejected(reason) => format!("ng {} {}", self.command.ref_name, reason),
        }
    }
}

/// Structured result of a receive-pack request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Objects unpacked, or why unpacking failed.
    pub unpack: std::result::Result<usize, String>,
    /// One entry per command, in request order.
    pub updates: Vec<RefUpdate>,
}

impl ReceiveReport {
    /// Updates that were applied.
    pub fn accepted(&self) -> impl Iterator<Item = &RefUpdate> {
        self.updates.iter().filter(|u| u.is_ok())
    }

    /// Returns true if the pack unpacked and every ref was applied.
    pub fn all_ok(&self) -> bool {
        self.unpack.is_ok() && self.updates.iter().all(RefUpdate::is_ok)
    }

    /// Encodes the report-status section.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut pkt_writer = PktLineWriter::new(Vec::new());
        match &self.unpack {
            Ok(_) => pkt_writer.write_line("unpack ok")?,
            Err(reason) => pkt_writer.write_line(&format!("unpack {}", reason))?,
        }
        for update in &self.updates {
            pkt_writer.write_line(&update.status_line())?;
        }
        pkt_writer.flush_pkt()?;
        Ok(pkt_writer.into_inner())
    }
}

/// Tuning for receive-pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOptions {
    /// Most commits walked when counting what a push introduced.
    pub max_commits: usize,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            max_commits: DEFAULT_MAX_PUSH_COMMITS,
        }
    }
}

/// Handles git-receive-pack (push) with default options.
pub fn receive_pack<W: Write>(
    body: &[u8],
    writer: &mut W,
    repo: &RepoHandle,
    pusher: &str,
) -> Result<ReceiveReport> {
    receive_pack_with(body, writer, repo, pusher, &PushOptions::default())
}

/// Handles git-receive-pack (push).
///
/// The pack is stored before any ref moves. Each command succeeds or fails
/// on its own, and every command gets exactly one status line.
pub fn receive_pack_with<W: Write>(
    body: &[u8],
    writer: &mut W,
    repo: &RepoHandle,
    pusher: &str,
    options: &PushOptions,
) -> Result<ReceiveReport> {
    let request = ReceiveRequest::parse(body)?;
    if request.commands.is_empty() {
        return Ok(ReceiveReport {
            unpack: Ok(0),
            updates: Vec::new(),
        });
    }

    let unpack = if request.pack.is_empty() {
        Ok(0)
    } else {
        PackParser::new(request.pack)
            .parse(&repo.objects)
            .map(|ids| ids.len())
            .map_err(|e| {
                tracing::warn!(repo = %repo.id.short(), error = %e, "rejected push pack");
                e.to_string().replace('\n', " ")
            })
    };

    let updates = match &unpack {
        Err(_) => request
            .commands
            .iter()
            .map(|command| RefUpdate::rejected(command, "unpacker error"))
            .collect(),
        Ok(_) => request
            .commands
            .iter()
            .map(|command| apply_command(repo, command, pusher, options))
            .collect(),
    };

    let report = ReceiveReport { unpack, updates };
    let encoded = report.encode()?;
    let mut pkt_writer = PktLineWriter::new(writer);
    match request.sideband() {
        Some(variant) => {
            pkt_writer.write_sideband(Band::Data, &encoded, variant)?;
            pkt_writer.flush_pkt()?;
        }
        None => pkt_writer.write_raw(&encoded)?,
    }
    pkt_writer.flush()?;

    tracing::info!(
        repo = %repo.id.short(),
        pusher,
        commands = report.updates.len(),
        accepted = report.accepted().count(),
        "processed push"
    );
    Ok(report)
}

fn apply_command(
    repo: &RepoHandle,
    command: &Command,
    pusher: &str,
    options: &PushOptions,
) -> RefUpdate {
    let Some(branch) = command.branch_name() else {
        return RefUpdate::rejected(command, "ref-not-supported");
    };
    if validate_branch_name(branch).is_err() {
        return RefUpdate::rejected(command, "invalid ref name");
    }

    let result = if command.is_delete() {
        repo.refs
            .delete_branch(&repo.id, branch, command.old_id)
            .map(|_| (0, None))
            .map_err(GitError::from)
    } else {
        update_branch(repo, branch, command, pusher, options)
    };

    match result {
        Ok((commit_count, summary)) => RefUpdate {
            command: command.clone(),
            status: RefStatus::Ok,
            commit_count,
            summary,
        },
        Err(GitError::Storage(StorageError::NonFastForward { .. })) => {
            RefUpdate::rejected(command, "non-fast-forward")
        }
        Err(GitError::ObjectNotFound(_)) => RefUpdate::rejected(command, "missing necessary objects"),
        Err(e) => {
            tracing::warn!(ref_name = %command.ref_name, error = %e, "ref update failed");
            RefUpdate::rejected(command, e.to_string().replace('\n', " "))
        }
    }
}

/// Checks connectivity of the new tip, counts new commits and moves the branch.
fn update_branch(
    repo: &RepoHandle,
    branch: &str,
    command: &Command,
    pusher: &str,
    options: &PushOptions,
) -> Result<(usize, Option<String>)> {
    let store = &repo.objects;
    let missing = || GitError::ObjectNotFound(command.new_id.to_hex());

    match store.get_object(&command.new_id)? {
        Some(object) if object.object_type == ObjectType::Commit => {}
        _ => return Err(missing()),
    }

    // Existing tips are fully connected, so the walk can stop at them.
    let tips: HashSet<ObjectId> = repo.branch_tips().into_iter().collect();
    let closure = store.reachable_closure([command.new_id], &tips)?;
    if !closure.missing.is_empty() {
        tracing::debug!(
            ref_name = %command.ref_name,
            missing = closure.missing.len(),
            "push is not self-contained"
        );
        return Err(missing());
    }

    let exclude = (!command.old_id.is_zero()).then_some(&command.old_id);
    let commits = store.walk_commits_excluding(&command.new_id, exclude, options.max_commits)?;
    let summary = commits.first().map(|(_, c)| c.summary().to_string());

    repo.refs.push_branch(
        &repo.id,
        branch,
        command.new_id,
        command.old_id,
        commits.len(),
        pusher,
    )?;
    Ok((commits.len(), summary))
}
