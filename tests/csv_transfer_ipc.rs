mod test_support;

use serde_json::json;
use test_support::{error_code, open_workspace, request, request_ok};

#[test]
fn export_then_import_reasserts_every_row() {
    let (mut child, mut stdin, mut reader, workspace) = open_workspace("cardvault-csv-roundtrip");
    let out = workspace.join("collection.csv");

    for (i, (card_id, qty)) in [(1, 1), (2, 4), (3, 2)].into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("add-{i}"),
            "collection.add",
            json!({ "ref": { "cardId": card_id }, "qty": qty }),
        );
    }
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "export",
        "collection.exportCsv",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(exported.get("rowCount").and_then(|v| v.as_i64()), Some(3));

    let bytes = std::fs::read(&out).expect("read export");
    assert!(bytes.starts_with(&[0xEF, 0xBB, 0xBF]), "export starts with a BOM");

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "collection.importCsv",
        json!({ "inPath": out.to_string_lossy() }),
    );
    assert_eq!(
        imported,
        json!({ "added": 0, "updated": 3, "removed": 0, "ignored": 0 })
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn one_malformed_row_does_not_block_nine_valid_ones() {
    let (mut child, mut stdin, mut reader, workspace) = open_workspace("cardvault-csv-isolation");

    // Nine catalog cards beyond the three seeded ones.
    let mut ids = Vec::new();
    for i in 0..9 {
        let added = request_ok(
            &mut stdin,
            &mut reader,
            &format!("card-{i}"),
            "cards.add",
            json!({ "name": format!("Test Card {i}"), "edition": "Beta" }),
        );
        ids.push(added.get("id").and_then(|v| v.as_i64()).expect("id"));
    }

    let mut text = String::from("card_id,quantity,name\n");
    for (i, id) in ids.iter().enumerate() {
        text.push_str(&format!("{id},{},\"Test Card {i}\"\n", i + 1));
    }
    text.push_str("1,many,\"Black Lotus\"\n");
    let path = workspace.join("mixed.csv");
    std::fs::write(&path, text).expect("write csv");

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "collection.importCsv",
        json!({ "inPath": path.to_string_lossy() }),
    );
    assert_eq!(imported.get("added").and_then(|v| v.as_i64()), Some(9));
    assert_eq!(imported.get("ignored").and_then(|v| v.as_i64()), Some(1));

    let stats = request_ok(&mut stdin, &mut reader, "stats", "collection.stats", json!({}));
    assert_eq!(stats.get("total").and_then(|v| v.as_i64()), Some(45));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn semicolon_files_with_comma_decimals_are_accepted() {
    let (mut child, mut stdin, mut reader, workspace) = open_workspace("cardvault-csv-semicolon");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "collection.add",
        json!({ "ref": { "cardId": 1 }, "qty": 5 }),
    );
    let path = workspace.join("locale.csv");
    std::fs::write(&path, "\u{feff}\"Quantity\";\"Card_Id\"\r\n\"2,0\";\"2\"\r\n\"0\";\"1\"\r\n\r\n")
        .expect("write csv");

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "collection.importCsv",
        json!({ "inPath": path.to_string_lossy() }),
    );
    assert_eq!(
        imported,
        json!({ "added": 1, "updated": 0, "removed": 1, "ignored": 0 })
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn missing_header_and_dismissed_prompts() {
    let (mut child, mut stdin, mut reader, workspace) = open_workspace("cardvault-csv-errors");

    let path = workspace.join("no-qty.csv");
    std::fs::write(&path, "card_id,amount\n1,2\n").expect("write csv");
    let failed = request(
        &mut stdin,
        &mut reader,
        "1",
        "collection.importCsv",
        json!({ "inPath": path.to_string_lossy() }),
    );
    assert_eq!(error_code(&failed), Some("bad_params"));

    let missing_file = request(
        &mut stdin,
        &mut reader,
        "2",
        "collection.importCsv",
        json!({ "inPath": workspace.join("absent.csv").to_string_lossy() }),
    );
    assert_eq!(error_code(&missing_file), Some("io_failed"));

    for (id, method) in [("3", "collection.exportCsv"), ("4", "collection.importCsv")] {
        let resp = request(&mut stdin, &mut reader, id, method, json!({}));
        assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(resp.get("canceled").and_then(|v| v.as_bool()), Some(true));
        assert!(resp.get("error").is_none());
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
