//! Black-box table test over the public `url_target` API, matching
//! `spec.md` §8's literal parser scenarios and boundary behavior.

use browser_broker::url_target::parse_target;

#[test]
fn table() {
    let cases: &[(&str, Result<(&str, &str), ()>)] = &[
        ("/sid/foo/../bar.txt", Ok(("sid", "/bar.txt"))),
        ("/sid/.foo", Err(())),
        ("/sid/a/b/c.txt", Ok(("sid", "/a/b/c.txt"))),
        ("/sid/a//b.txt", Ok(("sid", "/a/b.txt"))),
        ("/sid/", Ok(("sid", "/index.html"))),
        ("/sid", Ok(("sid", "/index.html"))),
        ("/sid/a/~/b.txt", Ok(("sid", "/b.txt"))),
        ("/", Err(())),
        ("", Err(())),
        ("/sid/a@b", Err(())),
        ("/sid/a%20b", Err(())),
        ("/sid/a+b", Err(())),
    ];

    for (input, expected) in cases {
        let actual = parse_target(input);
        match expected {
            Ok((sid, path)) => {
                let (got_sid, got_path) = actual
                    .unwrap_or_else(|e| panic!("expected Ok for {input:?}, got error: {e}"));
                assert_eq!(&got_sid, sid, "session id mismatch for {input:?}");
                assert_eq!(&got_path, path, "path mismatch for {input:?}");
            }
            Err(()) => {
                assert!(actual.is_err(), "expected Err for {input:?}, got {actual:?}");
            }
        }
    }
}

#[test]
fn every_accepted_path_starts_with_slash_and_has_no_dot_segments() {
    let inputs = [
        "/sid/a/b/c.txt",
        "/sid/foo/../bar.txt",
        "/sid/./x.txt",
        "/sid/",
    ];
    for input in inputs {
        let (_, path) = parse_target(input).unwrap();
        assert!(path.starts_with('/'));
        for seg in path.split('/') {
            assert_ne!(seg, "..");
            assert_ne!(seg, ".");
            assert_ne!(seg, "~");
        }
    }
}
