/*
 * vSMTP mail transfer agent
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

use vsmtp_mime::MimePart;

/// Build a complete path from the current cargo manifest files using a relative path.
#[macro_export]
macro_rules! from_manifest_path {
    ($path:expr) => {
        std::path::PathBuf::from_iter([env!("CARGO_MANIFEST_DIR"), $path])
    };
}

fn visit_dirs(
    dir: &std::path::Path,
    cb: &dyn Fn(&std::fs::DirEntry) -> std::io::Result<()>,
) -> std::io::Result<()> {
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                visit_dirs(&path, cb)?;
            } else {
                cb(&entry)?;
            }
        }
    }
    Ok(())
}

fn to_crlf(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 20);
    for byte in raw {
        if *byte == b'\n' {
            out.push(b'\r');
        }
        out.push(*byte);
    }
    out
}

#[test_log::test]
fn test_parse_whole_folder() {
    visit_dirs(
        &from_manifest_path!("tests/mail"),
        &|entry| -> std::io::Result<()> {
            println!("reading {entry:?}");
            let raw = std::fs::read(entry.path())?;

            for raw in [raw.clone(), to_crlf(&raw)] {
                let mail = MimePart::from_bytes(raw.clone()).expect("failed to parse email");
                assert!(mail.is_root());
                pretty_assertions::assert_eq!(
                    String::from_utf8_lossy(&mail.to_bytes().expect("failed to produce email")),
                    String::from_utf8_lossy(&raw)
                );
                pretty_assertions::assert_eq!(mail.size().unwrap(), raw.len());
            }

            Ok(())
        },
    )
    .expect("folder contain valid mail");
}

#[test_log::test]
fn decoding_does_not_alter_the_output() {
    visit_dirs(
        &from_manifest_path!("tests/mail"),
        &|entry| -> std::io::Result<()> {
            let raw = std::fs::read(entry.path())?;
            let mail = MimePart::from_bytes(raw.clone()).expect("failed to parse email");

            for part in mail.walk(true, false) {
                part.headers().expect("failed to parse headers");
                part.body().expect("failed to decode body");
            }

            assert!(!mail.was_changed());
            pretty_assertions::assert_eq!(mail.to_bytes().unwrap(), raw);
            Ok(())
        },
    )
    .expect("folder contain valid mail");
}

#[test_log::test]
fn exclude_attachments() {
    let raw = include_str!("mail/mixed.eml");
    let mut mail = MimePart::from_bytes(raw).unwrap();

    mail.parts_mut().retain(|part| !part.is_attachment());
    pretty_assertions::assert_eq!(mail.parts().len(), 1);

    let kept_end = raw.find("Bonne journ=E9e=21").unwrap() + "Bonne journ=E9e=21".len();
    let final_start = raw.find("\n------=_Part_0_1234--").unwrap();

    pretty_assertions::assert_eq!(
        String::from_utf8(mail.to_bytes().unwrap()).unwrap(),
        format!("{}{}", &raw[..kept_end], &raw[final_start..])
    );
}

#[test_log::test]
fn concrete_scenarios() {
    let mail = MimePart::from_bytes("Content-Type: text/plain\r\n\r\nhello").unwrap();
    pretty_assertions::assert_eq!(mail.content_type().format_type(), "text/plain");
    pretty_assertions::assert_eq!(
        mail.body().unwrap().and_then(vsmtp_mime::Body::as_text),
        Some("hello")
    );

    let raw = "Content-Type: multipart/mixed; boundary=X\r\n\r\n--X\r\n\r\none\r\n--X\r\n\r\ntwo\r\n--X--\r\n";
    let mail = MimePart::from_bytes(raw).unwrap();
    pretty_assertions::assert_eq!(mail.parts().len(), 2);
    pretty_assertions::assert_eq!(mail.to_bytes().unwrap(), raw.as_bytes());
}

#[test_log::test]
fn stream_output() {
    let raw = include_bytes!("mail/nested.eml");
    let mail = MimePart::from_reader(raw.as_slice()).unwrap();

    let mut out = std::io::Cursor::new(vec![]);
    mail.to_stream(&mut out).unwrap();
    pretty_assertions::assert_eq!(out.into_inner(), raw.to_vec());
}
