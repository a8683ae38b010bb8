mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_ok};

#[test]
fn unknown_paid_price_counts_quantity_but_not_cost() {
    let (mut child, mut stdin, mut reader, workspace) = open_workspace("cardvault-valuation-paid");

    let bolt = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "collection.add",
        json!({ "ref": { "cardId": 2 }, "qty": 4 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "collection.add",
        json!({ "ref": { "cardId": 3 }, "qty": 1 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "collection.updateDetails",
        json!({ "id": bolt["rowId"], "paidEur": 2.0 }),
    );

    let stats = request_ok(&mut stdin, &mut reader, "4", "collection.stats", json!({}));
    assert_eq!(stats.get("total").and_then(|v| v.as_i64()), Some(5));
    assert_eq!(stats.get("distinct").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(stats.get("invested").and_then(|v| v.as_f64()), Some(8.0));
    assert_eq!(stats.get("current").and_then(|v| v.as_f64()), Some(15.0));
    assert_eq!(stats.get("delta").and_then(|v| v.as_f64()), Some(7.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn catalog_backed_rows_are_repaired_and_priced() {
    let (mut child, mut stdin, mut reader, workspace) = open_workspace("cardvault-valuation-repair");

    let upserted = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "catalog.upsertBatch",
        json!({ "cards": [
            { "id": "s-ank", "name": "Ankh of Mishra", "set": "lea", "set_name": "Limited Edition Alpha",
              "released_at": "1993-08-05", "rarity": "rare", "collector_number": "231",
              "prices": { "eur": "310.00", "usd": "400.00" } },
            { "id": "s-brn", "name": "Birds of Paradise", "set": "lea", "set_name": "Limited Edition Alpha",
              "rarity": "rare", "collector_number": "187", "prices": { "eur": null } }
        ] }),
    );
    assert_eq!(upserted.get("upserted").and_then(|v| v.as_i64()), Some(2));

    let sets = request_ok(&mut stdin, &mut reader, "2", "catalog.sets", json!({}));
    assert_eq!(sets["sets"][0]["code"], "lea");
    let cards = request_ok(&mut stdin, &mut reader, "3", "catalog.cardsBySet", json!({ "code": "lea" }));
    assert_eq!(cards["cards"][0]["collectorNumber"], "187");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "collection.add",
        json!({ "ref": { "externalId": "s-ank" }, "qty": 2 }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "5", "collection.listDetailed", json!({}));
    let item = &listed["items"][0];
    assert_eq!(item["name"], "Ankh of Mishra");
    assert_eq!(item["priceEur"].as_f64(), Some(310.0));
    assert_eq!(item["currentValue"].as_f64(), Some(620.0));

    let diag = request_ok(&mut stdin, &mut reader, "6", "collection.diagnose", json!({}));
    assert_eq!(diag.get("total").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(diag.get("withLink").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(diag.get("joinHits").and_then(|v| v.as_i64()), Some(1));

    let first = request_ok(&mut stdin, &mut reader, "7", "collection.repair", json!({}));
    let second = request_ok(&mut stdin, &mut reader, "8", "collection.repair", json!({}));
    for report in [&first, &second] {
        assert_eq!(report.get("fixedByNameSet").and_then(|v| v.as_i64()), Some(0));
    }
    assert_eq!(
        second,
        json!({ "fixedByNameSet": 0, "fixedFromCatalog": 0, "fixedFromExternalId": 0 })
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
