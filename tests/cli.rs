//! End-to-end tests for the `xml2html` binary.
//!
//! These run without a stylesheet, so the inputs are taken as already
//! transformed markup and `xsltproc` is not needed.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn xml2html(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_xml2html"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to run xml2html")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

#[test]
fn single_file_with_header_and_footer() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("page.xml"),
        "<?xml version=\"1.0\"?>\n<div><p/><br/></div>",
    )
    .unwrap();
    fs::write(tmp.path().join("header.html"), "<html><title>@title@</title>\n").unwrap();
    fs::write(tmp.path().join("footer.html"), "\n</html>\n").unwrap();

    let out = xml2html(
        tmp.path(),
        &[
            "build", "-i", "page.xml", "-o", "page.html", "-h", "header.html", "-f",
            "footer.html", "-p", "title=Home",
        ],
    );
    assert!(out.status.success(), "{}", stderr(&out));

    let html = fs::read_to_string(tmp.path().join("page.html")).unwrap();
    assert_eq!(
        html,
        "<html><title>Home</title>\n<div><p></p><br/></div>\n</html>"
    );
    assert!(stdout(&out).contains("Built 1 document"));
}

#[test]
fn strip_flag_removes_indentation() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("page.xml"),
        "<div>\n    <p>a</p>\n\n    <pre>\n  keep\n</pre>\n</div>\n",
    )
    .unwrap();

    let out = xml2html(tmp.path(), &["build", "-i", "page.xml", "-o", "page.html", "-s"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let html = fs::read_to_string(tmp.path().join("page.html")).unwrap();
    assert_eq!(html, "<div>\n<p>a</p>\n<pre>\n  keep\n</pre>\n</div>\n");
}

#[test]
fn missing_header_parameter_fails_without_output() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("page.xml"), "<p>x</p>").unwrap();
    fs::write(tmp.path().join("header.html"), "<h1>@nope@</h1>").unwrap();

    let out = xml2html(
        tmp.path(),
        &["build", "-i", "page.xml", "-o", "page.html", "-h", "header.html"],
    );
    assert!(!out.status.success());
    assert!(stdout(&out).contains("FAILED page.xml"));
    assert!(stdout(&out).contains("nope"));
    assert!(!tmp.path().join("page.html").exists());
}

#[test]
fn directory_mode_mirrors_tree() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("src/blog")).unwrap();
    fs::write(tmp.path().join("src/index.xml"), "<p>home</p>").unwrap();
    fs::write(tmp.path().join("src/blog/post.xml"), "<p>post</p>").unwrap();
    fs::write(tmp.path().join("header.html"), "<a href=\"@relroot@\">up</a>").unwrap();

    let out = xml2html(
        tmp.path(),
        &[
            "build", "-r", "src", "-o", "site", "-h", "header.html", "-i", "src/index.xml",
            "-i", "src/blog/post.xml",
        ],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).contains("Built 2 documents"));

    let index = fs::read_to_string(tmp.path().join("site/index.html")).unwrap();
    let post = fs::read_to_string(tmp.path().join("site/blog/post.html")).unwrap();
    assert_eq!(index, "<a href=\"./\">up</a>\n<p>home</p>");
    assert_eq!(post, "<a href=\"../\">up</a>\n<p>post</p>");
}

#[test]
fn directory_mode_requires_root() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.xml"), "<p/>").unwrap();
    fs::write(tmp.path().join("b.xml"), "<p/>").unwrap();

    let out = xml2html(
        tmp.path(),
        &["build", "-o", "site", "-i", "a.xml", "-i", "b.xml"],
    );
    assert!(!out.status.success());
}

#[test]
fn unknown_encoding_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("page.xml"), "<p/>").unwrap();

    let out = xml2html(
        tmp.path(),
        &["build", "-i", "page.xml", "-o", "page.html", "-e", "klingon"],
    );
    assert!(!out.status.success());
    assert!(!tmp.path().join("page.html").exists());
}

// ---------------------------------------------------------------------------
// state
// ---------------------------------------------------------------------------

#[test]
fn state_lifecycle() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("page.xml"),
        "<page><title>Hello</title><date>2024-05-01</date></page>",
    )
    .unwrap();

    let out = xml2html(tmp.path(), &["state", "init", "--state", "state.xml"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(tmp.path().join("state.xml").exists());

    let out = xml2html(
        tmp.path(),
        &["build", "-i", "page.xml", "-o", "page.html", "--state", "state.xml"],
    );
    assert!(out.status.success(), "{}", stderr(&out));

    let out = xml2html(tmp.path(), &["state", "show", "--state", "state.xml"]);
    let listing = stdout(&out);
    assert!(listing.contains("Staging"));
    assert!(listing.contains("001 Hello → page.html"));

    let out = xml2html(tmp.path(), &["state", "finalize", "--state", "state.xml"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).contains("Promoted 1 page, pruned 0, 1 in state"));

    fs::remove_file(tmp.path().join("page.html")).unwrap();
    let out = xml2html(tmp.path(), &["state", "finalize", "--state", "state.xml"]);
    assert!(stdout(&out).contains("Pruned page.html"));
}

// ---------------------------------------------------------------------------
// gen-config
// ---------------------------------------------------------------------------

#[test]
fn gen_config_output_is_loadable() {
    let tmp = TempDir::new().unwrap();
    let out = xml2html(tmp.path(), &["gen-config"]);
    assert!(out.status.success());
    fs::write(tmp.path().join("xml2html.toml"), &out.stdout).unwrap();
    fs::write(tmp.path().join("page.xml"), "<p>x</p>").unwrap();

    let out = xml2html(tmp.path(), &["build", "-i", "page.xml", "-o", "page.html"]);
    assert!(out.status.success(), "{}", stderr(&out));
}
