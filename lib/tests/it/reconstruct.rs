use pretty_assertions::assert_eq;
use unweave_lib::{Dockerfile, HistoryEntry, InstructionKind, MISSING_LAYER_ID};

fn entry(id: &str, created_by: &str, tags: &[&str], size: i64) -> HistoryEntry {
    HistoryEntry::builder()
        .id(id)
        .created(1700000000)
        .created_by(created_by)
        .tags(tags.iter().map(|tag| tag.to_string()).collect::<Vec<_>>())
        .size(size)
        .build()
}

#[test_log::test]
fn empty_history() {
    let dockerfile = Dockerfile::from_history(&[]);
    assert_eq!(dockerfile.lines, vec!["FROM scratch"]);
    assert!(dockerfile.image_stack.is_empty());
    assert!(dockerfile.all_instructions.is_empty());
    assert!(!dockerfile.has_onbuild);
}

#[test_log::test]
fn single_tagged_cmd() {
    let history = vec![entry(
        "sha256:abc",
        "/bin/sh -c #(nop) CMD [\"sh\"]",
        &["img:1"],
        0,
    )];
    let dockerfile = Dockerfile::from_history(&history);

    assert_eq!(dockerfile.image_stack.len(), 1);
    let frame = &dockerfile.image_stack[0];
    assert!(frame.is_top_image);
    assert_eq!(frame.id, "sha256:abc");
    assert_eq!(frame.full_name, "img:1");
    assert_eq!(frame.repo_name, "img");
    assert_eq!(frame.version_tag, "1");
    assert_eq!(frame.base_image_id, "");
    assert_eq!(frame.instructions.len(), 1);

    let inst = &frame.instructions[0];
    assert_eq!(inst.kind, InstructionKind::Cmd);
    assert!(inst.is_exec_form);
    assert!(inst.is_nop);
    assert!(inst.is_last_instruction);
    assert!(inst.local_image_exists);
    assert_eq!(inst.intermediate_image_id, "");
    assert_eq!(inst.command_all, "CMD [\"sh\"]");
    assert_eq!(inst.time, "2023-11-14T22:13:20Z");

    assert_eq!(
        dockerfile.lines,
        vec![
            "FROM scratch",
            "# new image",
            "CMD [\"sh\"]",
            "# end of image: img:1 (id:  tags: img:1)",
            "",
        ]
    );
}

#[test_log::test]
fn run_shell_form_commands() {
    let history = vec![entry(
        "sha256:abc",
        "/bin/sh -c apt-get update && apt-get install -y curl",
        &["img:1"],
        104857600,
    )];
    let dockerfile = Dockerfile::from_history(&history);

    let inst = &dockerfile.all_instructions[0];
    assert_eq!(inst.kind, InstructionKind::Run);
    assert!(!inst.is_exec_form);
    assert_eq!(
        inst.command_all,
        "RUN apt-get update && \\\n\tapt-get install -y curl"
    );
    assert_eq!(
        inst.system_commands,
        vec!["apt-get update", "apt-get install -y curl"]
    );
    assert_eq!(inst.params, "");
    assert_eq!(inst.size, 104857600);
    assert_eq!(inst.size_human, "105 MB");
}

#[test_log::test]
fn build_arg_prefixes() {
    let history = vec![
        entry("sha256:top", "|1 X=1 python -c 'print(1)'", &["img:1"], 10),
        entry(MISSING_LAYER_ID, "|2 FOO=bar BAZ=qux /bin/sh -c echo hi", &[], 0),
    ];
    let dockerfile = Dockerfile::from_history(&history);

    // Oldest entry first in emission order.
    assert_eq!(dockerfile.all_instructions[0].command_all, "RUN echo hi");
    assert!(!dockerfile.all_instructions[0].is_exec_form);
    assert_eq!(
        dockerfile.all_instructions[1].command_all,
        "RUN [\"python\",\"-c\",\"print(1)\"]"
    );
    assert!(dockerfile.all_instructions[1].is_exec_form);
}

#[test_log::test]
fn add_source_and_target() {
    let history = vec![entry(
        "sha256:abc",
        "/bin/sh -c #(nop) ADD file:abc123 in /usr/bin/app ",
        &["img:1"],
        2048,
    )];
    let dockerfile = Dockerfile::from_history(&history);

    let inst = &dockerfile.all_instructions[0];
    assert_eq!(inst.kind, InstructionKind::Add);
    assert_eq!(inst.source_type, "file");
    assert_eq!(inst.target, "/usr/bin/app");
    assert_eq!(inst.params, "file:abc123 in /usr/bin/app");
    assert_eq!(inst.command_all, "ADD file:abc123 /usr/bin/app");
    assert_eq!(inst.size_human, "2.0 kB");
}

#[test_log::test]
fn entrypoint_go_struct_rewrite() {
    let history = vec![entry(
        "sha256:abc",
        "/bin/sh -c #(nop)  ENTRYPOINT &{[\"/app\" \"--flag\"]}",
        &["img:1"],
        0,
    )];
    let dockerfile = Dockerfile::from_history(&history);

    let inst = &dockerfile.all_instructions[0];
    assert_eq!(inst.kind, InstructionKind::Entrypoint);
    assert!(inst.is_exec_form);
    assert_eq!(inst.command_all, "ENTRYPOINT [\"/app\",\"--flag\"]");
}

#[test_log::test]
fn multi_frame_stack() {
    // Newest-first, as the daemon returns history.
    let history = vec![
        entry("sha256:top", "/bin/sh -c #(nop) CMD [\"sh\"]", &["app:2"], 0),
        entry(MISSING_LAYER_ID, "/bin/sh -c curl -sSf https://example.com", &[], 1234),
        entry("sha256:base", "/bin/sh -c #(nop) ADD file:xyz in /", &["base:1"], 500),
    ];
    let dockerfile = Dockerfile::from_history(&history);

    assert_eq!(dockerfile.image_stack.len(), 2);
    let base = &dockerfile.image_stack[0];
    let top = &dockerfile.image_stack[1];

    assert!(!base.is_top_image);
    assert_eq!(base.id, "sha256:base");
    assert_eq!(base.base_image_id, "");
    assert_eq!(base.full_name, "base:1");
    assert_eq!(base.new_size, 500);
    assert_eq!(base.instructions.len(), 1);

    assert!(top.is_top_image);
    assert_eq!(top.id, "sha256:top");
    assert_eq!(top.base_image_id, "sha256:base");
    assert_eq!(top.full_name, "app:2");
    assert_eq!(top.new_size, 1234);
    assert_eq!(top.instructions.len(), 2);

    // Size is conserved across frames.
    let total: i64 = dockerfile.image_stack.iter().map(|frame| frame.new_size).sum();
    assert_eq!(total, history.iter().map(|entry| entry.size).sum::<i64>());

    // Every instruction appears in exactly one frame, in emission order.
    let flattened: Vec<_> = dockerfile
        .image_stack
        .iter()
        .flat_map(|frame| frame.instructions.iter())
        .collect();
    let all: Vec<_> = dockerfile.all_instructions.iter().collect();
    assert_eq!(flattened, all);

    // The RUN layer is not materialized locally.
    let run = &top.instructions[0];
    assert!(!run.local_image_exists);
    assert_eq!(run.intermediate_image_id, "");
    assert!(!run.is_last_instruction);

    // Exactly the frame-closing instructions are last.
    assert!(base.instructions[0].is_last_instruction);
    assert!(top.instructions[1].is_last_instruction);

    assert_eq!(
        dockerfile.lines,
        vec![
            "FROM scratch",
            "# new image",
            "ADD file:xyz /",
            "# end of image: base:1 (id:  tags: base:1)",
            "",
            "# new image",
            "RUN curl -sSf https://example.com",
            "CMD [\"sh\"]",
            "# end of image: app:2 (id:  tags: app:2)",
            "",
        ]
    );
}

#[test_log::test]
fn aggregates_users_ports_maintainers() {
    // Newest-first: the daemon reverses build order.
    let history = vec![
        entry("sha256:top", "/bin/sh -c #(nop)  USER app", &["img:1"], 0),
        entry(MISSING_LAYER_ID, "/bin/sh -c #(nop)  EXPOSE 8080/tcp", &[], 0),
        entry(MISSING_LAYER_ID, "/bin/sh -c #(nop)  ONBUILD RUN make", &[], 0),
        entry(MISSING_LAYER_ID, "/bin/sh -c #(nop)  MAINTAINER dev@example.com", &[], 0),
        entry(MISSING_LAYER_ID, "/bin/sh -c #(nop)  USER root", &[], 0),
    ];
    let dockerfile = Dockerfile::from_history(&history);

    assert_eq!(dockerfile.all_users, vec!["root", "app"]);
    assert_eq!(dockerfile.exe_user, "app");
    assert_eq!(dockerfile.exposed_ports, vec!["8080/tcp"]);
    assert_eq!(dockerfile.maintainers, vec!["dev@example.com"]);
    assert!(dockerfile.has_onbuild);
}

#[test_log::test]
fn workdir_synthesizes_mkdir() {
    let history = vec![entry(
        "sha256:abc",
        "/bin/sh -c #(nop) WORKDIR /srv/app",
        &["img:1"],
        0,
    )];
    let dockerfile = Dockerfile::from_history(&history);

    let inst = &dockerfile.all_instructions[0];
    assert_eq!(inst.kind, InstructionKind::Workdir);
    assert_eq!(inst.system_commands, vec!["mkdir -p /srv/app"]);
    assert_eq!(inst.params, "/srv/app");
}

#[test_log::test]
fn layer_index_skips_nop_layers() {
    let history = vec![
        entry("sha256:top", "/bin/sh -c #(nop) CMD [\"sh\"]", &["img:1"], 0),
        entry(MISSING_LAYER_ID, "/bin/sh -c make install", &[], 100),
        entry(MISSING_LAYER_ID, "/bin/sh -c make", &[], 100),
    ];
    let dockerfile = Dockerfile::from_history(&history);

    assert_eq!(dockerfile.all_instructions[0].layer_index, 0);
    assert_eq!(dockerfile.all_instructions[1].layer_index, 1);
    assert_eq!(dockerfile.all_instructions[2].layer_index, -1);
}

#[test_log::test]
fn snippet_bounds() {
    let long = format!("/bin/sh -c {}", "a".repeat(100));
    let history = vec![entry("sha256:abc", &long, &["img:1"], 0)];
    let dockerfile = Dockerfile::from_history(&history);

    let inst = &dockerfile.all_instructions[0];
    assert_eq!(inst.command_snippet.len(), 47);
    assert!(inst.command_snippet.ends_with("..."));
    assert_eq!(&inst.command_snippet[..44], &inst.command_all[..44]);

    let short = Dockerfile::from_history(&[entry("sha256:abc", "/bin/sh -c ls", &["img:1"], 0)]);
    let inst = &short.all_instructions[0];
    assert_eq!(inst.command_snippet, inst.command_all);
}

#[test_log::test]
fn empty_created_by_is_none_instruction() {
    let history = vec![entry("sha256:abc", "", &["img:1"], 0)];
    let dockerfile = Dockerfile::from_history(&history);

    let inst = &dockerfile.all_instructions[0];
    assert_eq!(inst.kind, InstructionKind::None);
    assert_eq!(inst.command_all, "#no instruction info");
    assert!(!inst.is_nop);
}

#[test_log::test(tokio::test)]
async fn save_writes_joined_lines() {
    let history = vec![entry("sha256:abc", "/bin/sh -c #(nop) CMD [\"sh\"]", &["img:1"], 0)];
    let dockerfile = Dockerfile::from_history(&history);

    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("Dockerfile");
    dockerfile.save(&path).await.expect("save Dockerfile");

    let written = std::fs::read_to_string(&path).expect("read Dockerfile");
    assert_eq!(written, dockerfile.lines.join("\n"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).expect("stat Dockerfile").permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
