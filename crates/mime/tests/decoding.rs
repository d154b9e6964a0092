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

use vsmtp_mime::{Body, DecodingError, Kind, Limits, MimePart};

fn text(part: &MimePart) -> String {
    part.body()
        .unwrap()
        .and_then(Body::as_text)
        .unwrap()
        .replace("\r\n", "\n")
}

#[test_log::test]
fn simple() {
    let mail = MimePart::from_bytes(include_str!("mail/simple.eml")).unwrap();

    pretty_assertions::assert_eq!(mail.kind(), Kind::Singlepart);
    pretty_assertions::assert_eq!(mail.subject().unwrap(), Some("Buenos días y buenas noches"));
    pretty_assertions::assert_eq!(mail.message_id().unwrap(), Some("f1e2d3c4@example.com"));
    pretty_assertions::assert_eq!(mail.charset().as_deref(), Some("ascii"));
    let received = mail.headers().unwrap().get_value("received").unwrap();
    assert!(received.starts_with("from mx.example.com (mx.example.com [192.0.2.1])"));
    assert!(received.ends_with("; Tue, 14 Mar 2023 10:12:03 +0100"));
    assert!(!received.contains('\n'));
    pretty_assertions::assert_eq!(
        text(&mail),
        "Hello Jane,\n\nthis is a plain text message.\n-- \nJohn\n"
    );
}

#[test_log::test]
fn mixed() {
    let mail = MimePart::from_bytes(include_str!("mail/mixed.eml")).unwrap();

    assert!(mail
        .headers()
        .unwrap()
        .get_value("To")
        .unwrap()
        .ends_with(", André <andre@example.fr>"));
    pretty_assertions::assert_eq!(
        mail.references().unwrap(),
        vec!["root@example.com", "reply-1@example.com"]
    );
    pretty_assertions::assert_eq!(mail.parts().len(), 2);

    let [body, report] = mail.parts() else {
        unreachable!()
    };

    assert!(body.is_body());
    pretty_assertions::assert_eq!(
        text(body),
        "Voici le rapport de l'été, comme prévu.\n--not-a-boundary\nBonne journée!"
    );

    assert!(report.is_attachment());
    pretty_assertions::assert_eq!(
        report.detected_file_name().as_deref(),
        Some("rapport d'ét.csv")
    );
    assert!(text(report).starts_with("ID,FirstName,LastName,Country\n348,John,Stiles,Canada\n"));
    assert!(text(report).ends_with("2893,Anaya,Iyengar,India"));
}

#[test_log::test]
fn nested() {
    let mail = MimePart::from_bytes(include_str!("mail/nested.eml")).unwrap();

    let types = mail
        .walk(false, false)
        .map(|part| part.content_type().format_type())
        .collect::<Vec<_>>();
    pretty_assertions::assert_eq!(
        types,
        vec![
            "multipart/alternative",
            "text/plain",
            "text/html",
            "message/rfc822",
            "multipart/alternative",
            "text/plain",
        ]
    );

    let alternative = &mail.parts()[0];
    pretty_assertions::assert_eq!(
        text(&alternative.parts()[0]),
        "See the message below, café at noon?"
    );
    pretty_assertions::assert_eq!(
        text(&alternative.parts()[1]),
        "<p>See the message below, café at&nbsp;noon?</p>"
    );

    let forwarded = mail.attached_message().unwrap();
    assert!(!forwarded.is_root());
    pretty_assertions::assert_eq!(forwarded.subject().unwrap(), Some("lunch"));
    pretty_assertions::assert_eq!(text(&forwarded.parts()[0]), "Lunch tomorrow?");

    pretty_assertions::assert_eq!(mail.walk(false, true).count(), 4);
}

#[test_log::test]
fn bounce() {
    let mail = MimePart::from_bytes(include_str!("mail/bounce.eml")).unwrap();
    assert!(mail.is_delivery_notification());

    let status = &mail.parts()[1];
    assert!(status.is_delivery_notification());
    pretty_assertions::assert_eq!(
        status
            .enclosed()
            .unwrap()
            .headers()
            .unwrap()
            .get_value("Reporting-MTA"),
        Some("dns; mx.example.com")
    );

    let headers = &mail.parts()[2];
    assert!(headers.content_type().is_headers_container());
    pretty_assertions::assert_eq!(headers.enclosed().unwrap().subject().unwrap(), Some("hello"));
}

#[test_log::test]
fn digest() {
    let mail = MimePart::from_bytes(include_str!("mail/digest.eml")).unwrap();

    let subjects = mail
        .parts()
        .iter()
        .map(|part| {
            assert!(part.content_type().is_message_container());
            part.enclosed().unwrap().subject().unwrap().unwrap()
        })
        .collect::<Vec<_>>();
    pretty_assertions::assert_eq!(subjects, vec!["first", "second"]);
}

#[test_log::test]
fn mislabelled_ascii_keeps_every_byte() {
    let raw = include_bytes!("mail/ascii_fallback.eml");
    let mail = MimePart::from_bytes(raw.as_slice()).unwrap();
    pretty_assertions::assert_eq!(mail.charset().as_deref(), Some("ascii"));

    let body_start = raw.windows(2).position(|window| window == b"\n\n").unwrap() + 2;
    let decoded = text(&mail);

    assert!(decoded.starts_with("Ceci n'est pas de l'ASCII: "));
    assert!(decoded.chars().count() >= raw.len() - body_start);
    assert!(!decoded.contains('\u{FFFD}'));
}

#[test_log::test]
fn mislabelled_ascii_without_ascii_bytes() {
    let body = b"\xc4\xe3\xba\xc3\xca\xc0\xbd\xe7\xd6\xd0\xce\xc4";
    let mut raw = b"Content-Type: text/plain; charset=ascii\r\nContent-Transfer-Encoding: 8bit\r\n\r\n".to_vec();
    raw.extend_from_slice(body);

    let mail = MimePart::from_bytes(raw).unwrap();
    let decoded = text(&mail);
    pretty_assertions::assert_eq!(decoded.chars().count(), body.len());
}

#[test_log::test]
fn deeply_nested_structure_is_rejected() {
    let mut input = String::new();
    for level in 0..1000 {
        input.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=b{level}\r\n\r\n--b{level}\r\n"
        ));
    }
    input.push_str("\r\nleaf\r\n");

    assert!(matches!(
        MimePart::from_bytes(input.clone()),
        Err(DecodingError::TooManyOperations { max: 500, .. })
    ));

    let lenient = MimePart::from_bytes_lenient(input, &Limits::default());
    pretty_assertions::assert_eq!(lenient.content_type().format_type(), "text/plain");
    assert!(lenient.parts().is_empty());
}

#[test_log::test]
fn limits_from_configuration() {
    let limits = serde_json::from_str::<Limits>(r#"{ "max_ops": 4 }"#).unwrap();

    assert!(matches!(
        MimePart::from_bytes_with(include_str!("mail/nested.eml"), &limits),
        Err(DecodingError::TooManyOperations { max: 4, .. })
    ));
    assert!(MimePart::from_bytes_with(include_str!("mail/simple.eml"), &limits).is_ok());
}
