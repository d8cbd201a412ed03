use super::*;
use sellerdesk_orders::RequestKind;

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["sellerdesk"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_fetch_defaults() {
    let cli = Cli::try_parse_from(["sellerdesk", "fetch"]).expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Fetch {
            max_results: None,
            created_after: None,
            created_before: None,
            next_token: None,
            refresh: false,
        })
    ));
}

#[test]
fn parses_fetch_with_window_and_refresh() {
    let cli = Cli::try_parse_from([
        "sellerdesk",
        "fetch",
        "--max-results",
        "250",
        "--created-after",
        "2024-05-01T00:00:00Z",
        "--refresh",
    ])
    .expect("expected valid cli args");

    let Some(Commands::Fetch {
        max_results,
        created_after,
        refresh,
        ..
    }) = cli.command
    else {
        panic!("expected fetch command");
    };
    assert_eq!(max_results, Some(250));
    assert_eq!(
        created_after.map(|t| t.to_rfc3339()),
        Some("2024-05-01T00:00:00+00:00".to_string())
    );
    assert!(refresh);
}

#[test]
fn fetch_rejects_malformed_timestamp() {
    let result = Cli::try_parse_from(["sellerdesk", "fetch", "--created-after", "yesterday"]);
    assert!(result.is_err());
}

#[test]
fn parses_maintenance_commands() {
    for (arg, expected) in [("sync", "Sync"), ("prune", "Prune"), ("eligible", "Eligible")] {
        let cli = Cli::try_parse_from(["sellerdesk", arg]).expect("expected valid cli args");
        let command = cli.command.expect("command");
        assert_eq!(format!("{command:?}"), expected);
    }
}

#[test]
fn check_requires_order_ids() {
    assert!(Cli::try_parse_from(["sellerdesk", "check"]).is_err());

    let cli = Cli::try_parse_from(["sellerdesk", "check", "503-1", "503-2"])
        .expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Check { ref order_ids }) if order_ids == &["503-1", "503-2"]
    ));
}

#[test]
fn parses_batch_send_with_template() {
    let cli = Cli::try_parse_from([
        "sellerdesk",
        "send",
        "503-1",
        "503-2",
        "--batch",
        "--template",
        "{{buyer_name}}様",
    ])
    .expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Send {
            ref order_ids,
            batch: true,
            template: Some(ref t),
            template_file: None,
        }) if order_ids.len() == 2 && t == "{{buyer_name}}様"
    ));
}

#[test]
fn send_template_sources_conflict() {
    let result = Cli::try_parse_from([
        "sellerdesk",
        "send",
        "503-1",
        "--template",
        "hi",
        "--template-file",
        "body.txt",
    ]);
    assert!(result.is_err());
}

#[test]
fn send_request_maps_batch_flag() {
    let single = commands::send_request(vec!["503-1".into()], false, None);
    assert_eq!(single.kind, RequestKind::Single);

    let batch = commands::send_request(vec!["503-1".into()], true, Some("t".into()));
    assert_eq!(batch.kind, RequestKind::Batch);
    assert_eq!(batch.template.as_deref(), Some("t"));
}
