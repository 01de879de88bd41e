//! Push then fetch through the protocol layer, the way a git client would
//! drive it over HTTP.

use knot_git::{
    advertise_refs, create_flush_pkt, create_packfile, create_pkt_line, parse_pkt_lines,
    receive_pack, upload_pack, FetchOutcome, PackParser, Service, DEFAULT_AGENT,
};
use knot_storage::{EntryKind, GitObject, ObjectId, ObjectStore, RepoHandle, RepoStore, TreeEntry};
use knot_types::Repository;

const AUTHOR: &str = "Alice <alice@example.com> 1700000000 +0000";

/// A client-side history.
struct Client {
    store: ObjectStore,
}

impl Client {
    fn new() -> Self {
        Self {
            store: ObjectStore::new(),
        }
    }

    fn commit(&self, path: &str, content: &str, parent: Option<ObjectId>) -> ObjectId {
        let blob = self.store.put_blob(content.as_bytes().to_vec()).unwrap();
        let tree = self
            .store
            .put(GitObject::tree(&[TreeEntry::new("100644", path, EntryKind::Blob, blob)]))
            .unwrap();
        let parents: Vec<ObjectId> = parent.into_iter().collect();
        self.store
            .put(GitObject::commit(&tree, &parents, AUTHOR, AUTHOR, content))
            .unwrap()
    }

    /// Pack of everything reachable from `tip` minus what `base` reaches.
    fn pack(&self, tip: ObjectId, base: Option<ObjectId>) -> Vec<u8> {
        let mut ids = self.store.get_reachable_objects(&tip).unwrap();
        if let Some(base) = base {
            for id in self.store.get_reachable_objects(&base).unwrap() {
                ids.remove(&id);
            }
        }
        create_packfile(&self.store, &ids).unwrap()
    }
}

fn push_body(old: ObjectId, new: ObjectId, ref_name: &str, pack: &[u8]) -> Vec<u8> {
    let mut body =
        create_pkt_line(format!("{} {} {}\0report-status\n", old, new, ref_name)).unwrap();
    body.extend(create_flush_pkt());
    body.extend_from_slice(pack);
    body
}

fn push(repo: &RepoHandle, old: ObjectId, new: ObjectId, ref_name: &str, pack: &[u8]) -> Vec<String> {
    let mut output = Vec::new();
    receive_pack(&push_body(old, new, ref_name, pack), &mut output, repo, "alice").unwrap();
    parse_pkt_lines(&output).unwrap()
}

fn fetch(repo: &RepoHandle, want: ObjectId, have: Option<ObjectId>) -> (FetchOutcome, Vec<u8>) {
    let mut body = create_pkt_line(format!("want {} ofs-delta\n", want)).unwrap();
    body.extend(create_flush_pkt());
    if let Some(have) = have {
        body.extend(create_pkt_line(format!("have {}\n", have)).unwrap());
    }
    body.extend(create_pkt_line("done\n").unwrap());

    let mut output = Vec::new();
    let outcome = upload_pack(&mut body.as_slice(), &mut output, repo).unwrap();
    (outcome, output)
}

#[test]
fn push_fetch_delete_lifecycle() {
    let server = RepoStore::new();
    let repo = server.open(&Repository::new("demo", "alice"));
    let client = Client::new();

    // Initial push creates main.
    let c0 = client.commit("README.md", "hello", None);
    let lines = push(&repo, ObjectId::ZERO, c0, "refs/heads/main", &client.pack(c0, None));
    assert_eq!(lines, vec!["unpack ok\n", "ok refs/heads/main\n"]);

    // Advertisement now names HEAD and main.
    let mut adv = Vec::new();
    advertise_refs(&mut adv, &repo, Service::UploadPack, DEFAULT_AGENT).unwrap();
    let adv = parse_pkt_lines(&adv).unwrap();
    assert_eq!(adv[0], "# service=git-upload-pack\n");
    assert!(adv[1].starts_with(&format!("{} HEAD\0", c0)));
    assert_eq!(adv[2], format!("{} refs/heads/main\n", c0));

    // Fast-forward push.
    let c1 = client.commit("README.md", "hello again", Some(c0));
    let lines = push(&repo, c0, c1, "refs/heads/main", &client.pack(c1, Some(c0)));
    assert_eq!(lines, vec!["unpack ok\n", "ok refs/heads/main\n"]);
    let branch = repo.refs.get_branch(&repo.id, "main").unwrap();
    assert_eq!(branch.tip, c1);
    assert_eq!(branch.last_push_commits, 1);

    // Incremental fetch returns only what c1 added.
    let (outcome, output) = fetch(&repo, c1, Some(c0));
    assert!(matches!(outcome, FetchOutcome::Packed { objects: 3, .. }));
    assert!(output.starts_with(b"0008NAK\n"));
    let fetched = PackParser::new(&output[8..])
        .decode(&ObjectStore::new())
        .unwrap();
    let fetched_ids: Vec<ObjectId> = fetched.iter().map(|o| o.id).collect();
    assert_eq!(fetched_ids[0], c1);
    for id in client.store.get_reachable_objects(&c0).unwrap() {
        assert!(!fetched_ids.contains(&id));
    }

    // Full clone round-trips every object.
    let (_, output) = fetch(&repo, c1, None);
    let clone = ObjectStore::new();
    let ids = PackParser::new(&output[8..]).parse(&clone).unwrap();
    assert_eq!(ids.len(), 6);
    assert_eq!(clone.get_commit(&c1).unwrap().unwrap().parents, vec![c0]);

    // A push based on the stale tip is rejected and leaves main alone.
    let stale = client.commit("OTHER.md", "diverged", Some(c0));
    let lines = push(&repo, c0, stale, "refs/heads/main", &client.pack(stale, Some(c0)));
    assert_eq!(lines, vec!["unpack ok\n", "ng refs/heads/main non-fast-forward\n"]);
    assert_eq!(repo.head(), Some(c1));

    // Delete.
    let lines = push(&repo, c1, ObjectId::ZERO, "refs/heads/main", &[]);
    assert_eq!(lines, vec!["unpack ok\n", "ok refs/heads/main\n"]);
    assert!(repo.head().is_none());

    let mut adv = Vec::new();
    advertise_refs(&mut adv, &repo, Service::UploadPack, DEFAULT_AGENT).unwrap();
    let adv = parse_pkt_lines(&adv).unwrap();
    assert!(adv[1].starts_with(&format!("{} capabilities^{{}}\0", ObjectId::ZERO)));
}

#[test]
fn corrupt_push_writes_nothing() {
    let server = RepoStore::new();
    let repo = server.open(&Repository::new("demo", "alice"));
    let client = Client::new();

    let c0 = client.commit("a.txt", "a", None);
    let mut pack = client.pack(c0, None);
    let middle = pack.len() / 2;
    pack[middle] ^= 0x55;

    let lines = push(&repo, ObjectId::ZERO, c0, "refs/heads/main", &pack);
    assert!(lines[0].starts_with("unpack "));
    assert_ne!(lines[0], "unpack ok\n");
    assert_eq!(lines[1], "ng refs/heads/main unpacker error\n");
    assert!(repo.objects.is_empty().unwrap());
    assert!(repo.refs.get_branches(&repo.id).is_empty());
}

#[test]
fn repositories_do_not_share_objects() {
    let server = RepoStore::new();
    let first = server.open(&Repository::new("one", "alice"));
    let second = server.open(&Repository::new("two", "alice"));
    let client = Client::new();

    let c0 = client.commit("a.txt", "a", None);
    push(&first, ObjectId::ZERO, c0, "refs/heads/main", &client.pack(c0, None));

    let (outcome, _) = fetch(&second, c0, None);
    assert_eq!(outcome, FetchOutcome::UnknownWant(c0));

    // Pushing only the commit to the second repository fails connectivity.
    let commit_only = create_packfile(&client.store, &[c0]).unwrap();
    let lines = push(&second, ObjectId::ZERO, c0, "refs/heads/main", &commit_only);
    assert_eq!(lines[1], "ng refs/heads/main missing necessary objects\n");
}
