//! Cursor pagination over a campaign's generated domains

use std::sync::Arc;

use domainflow_engine::campaign::{Campaign, CampaignId, CampaignType, ExecutionMode, GeneratedDomain};
use domainflow_engine::pagination::{
    encode_cursor, paginate_domains, PageRequest, SortOrder, GENERATED_DOMAINS_TABLE,
};
use domainflow_engine::storage::{StateStore, TransactionRunner, TxOptions};
use domainflow_engine::CancelToken;

async fn seeded(rows: u64) -> (tempfile::TempDir, Arc<StateStore>, CampaignId) {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(StateStore::new(dir.path()).unwrap());
    let runner = Arc::new(TransactionRunner::new(Arc::clone(&store)));
    let token = CancelToken::new();

    let mut campaign = Campaign::new("owner-1", CampaignType::Generation, ExecutionMode::SinglePhase);
    campaign.total_items = rows;
    let id = campaign.id;
    let stored = campaign.clone();
    runner
        .run(&token, TxOptions::for_campaign("seed_pagination", id), move |tx| {
            tx.put_campaign(&stored)?;
            for offset in 0..rows {
                tx.put_domain(&GeneratedDomain::new(id, offset, format!("page{}.com", offset)))?;
            }
            Ok(())
        })
        .await
        .unwrap();
    (dir, store, id)
}

fn offsets(page: &domainflow_engine::Page<GeneratedDomain>) -> Vec<u64> {
    page.data.iter().map(|d| d.offset_index).collect()
}

#[tokio::test]
async fn forward_pages_cover_the_campaign_without_overlap() {
    let (_dir, store, id) = seeded(10).await;

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let request = PageRequest { first: Some(4), after: after.clone(), ..Default::default() };
        let page = paginate_domains(&store, id, &request).unwrap();
        assert_eq!(page.page_info.total_count, Some(10));
        seen.extend(offsets(&page));
        if !page.page_info.has_next_page {
            break;
        }
        after = page.page_info.end_cursor.clone();
        assert!(after.is_some());
    }
    assert_eq!(seen, (0..10u64).collect::<Vec<_>>());
}

#[tokio::test]
async fn backward_pages_seek_past_the_read_window() {
    // More rows than the bounded read window, so the seek must land near the
    // cursor rather than at the front of the keyspace
    let (_dir, store, id) = seeded(300).await;

    let anchor = store.load_domain(id, 290).unwrap().unwrap();
    let cursor = encode_cursor(GENERATED_DOMAINS_TABLE, &format!("{:020}", 290), anchor.created_at);
    let request = PageRequest { last: Some(3), before: Some(cursor), ..Default::default() };

    let page = paginate_domains(&store, id, &request).unwrap();
    assert_eq!(offsets(&page), vec![287, 288, 289]);
    assert!(page.page_info.has_next_page);
    assert!(page.page_info.has_previous_page);

    // Chaining further back stays anchored
    let request = PageRequest {
        last: Some(3),
        before: page.page_info.start_cursor.clone(),
        ..Default::default()
    };
    let previous = paginate_domains(&store, id, &request).unwrap();
    assert_eq!(offsets(&previous), vec![284, 285, 286]);
}

#[tokio::test]
async fn descending_first_page_returns_the_tail() {
    let (_dir, store, id) = seeded(300).await;

    let request = PageRequest { first: Some(4), sort_order: SortOrder::Desc, ..Default::default() };
    let page = paginate_domains(&store, id, &request).unwrap();
    assert_eq!(offsets(&page), vec![299, 298, 297, 296]);
    assert!(page.page_info.has_next_page);

    let request = PageRequest {
        first: Some(4),
        after: page.page_info.end_cursor.clone(),
        sort_order: SortOrder::Desc,
        ..Default::default()
    };
    let next = paginate_domains(&store, id, &request).unwrap();
    assert_eq!(offsets(&next), vec![295, 294, 293, 292]);
    assert!(next.page_info.has_previous_page);
}

#[tokio::test]
async fn sort_by_offset_index_pages_by_offset() {
    let (_dir, store, id) = seeded(10).await;

    let request = PageRequest {
        first: Some(3),
        sort_by: Some("offsetIndex".to_string()),
        ..Default::default()
    };
    let page = paginate_domains(&store, id, &request).unwrap();
    assert_eq!(offsets(&page), vec![0, 1, 2]);

    let request = PageRequest {
        first: Some(3),
        after: page.page_info.end_cursor.clone(),
        sort_by: Some("offset_index".to_string()),
        ..Default::default()
    };
    let next = paginate_domains(&store, id, &request).unwrap();
    assert_eq!(offsets(&next), vec![3, 4, 5]);
}

#[tokio::test]
async fn unknown_sort_field_is_rejected() {
    let (_dir, store, id) = seeded(3).await;
    let request = PageRequest {
        first: Some(3),
        sort_by: Some("domain".to_string()),
        ..Default::default()
    };
    assert!(paginate_domains(&store, id, &request).is_err());
}

#[tokio::test]
async fn malformed_cursor_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(StateStore::new(dir.path()).unwrap());
    let id = CampaignId::new();
    let request = PageRequest {
        first: Some(4),
        after: Some("not-a-cursor".to_string()),
        ..Default::default()
    };
    assert!(paginate_domains(&store, id, &request).is_err());
}
