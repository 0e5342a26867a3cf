//! Black-box coverage for §8 testable property 4: for every file-producing
//! specialist call whose tool trace contains at least one artifact URL, the
//! content appended to the supervisor transcript is short, contains that
//! URL as a markdown link, and does not contain the artifact body.

use arcco_agent::validator::{blob_store_host, ensure_link_present, is_file_producing_route, suppress_content};

#[test]
fn a_specialist_reply_missing_the_link_gets_it_injected_from_the_tool_trace() {
    assert!(is_file_producing_route("file_generator"));

    let tool_trace = vec![
        "Aba 'Sheet1': 10 linhas x 3 colunas\n[Baixar Planilha](https://blob.example/u/planilha-20260730.xlsx)"
            .to_string(),
    ];
    let specialist_reply = "Pronto, gerei sua planilha com os dados solicitados.";

    let with_link = ensure_link_present(specialist_reply, &tool_trace, None);
    assert!(with_link.contains("https://blob.example/u/planilha-20260730.xlsx"));

    let suppressed = suppress_content(&with_link);
    assert!(suppressed.contains("https://blob.example/u/planilha-20260730.xlsx"));
    assert!(!suppressed.contains("linhas"), "artifact preview body must not survive suppression");
    assert!(suppressed.len() < specialist_reply.len() + tool_trace[0].len());
}

#[test]
fn a_reply_that_already_carries_the_link_is_left_untouched() {
    let tool_trace = vec!["[Baixar Planilha](https://blob.example/u/old.xlsx)".to_string()];
    let reply = "Aqui está: [Baixar Planilha](https://blob.example/u/new.xlsx)";

    let out = ensure_link_present(reply, &tool_trace, None);
    assert_eq!(out, reply, "a reply that already carries a link must not be rewritten");
}

#[test]
fn a_bare_url_matching_the_blob_store_host_is_injected_when_no_markdown_link_exists() {
    let tool_trace = vec![
        "Upload concluído: https://proj.supabase.co/storage/v1/object/public/relatorio-20260730.xlsx"
            .to_string(),
    ];
    let host = blob_store_host("https://proj.supabase.co");

    let out = ensure_link_present("Pronto, gerei sua planilha.", &tool_trace, host);
    assert!(out.contains("https://proj.supabase.co/storage/v1/object/public/relatorio-20260730.xlsx"));
}

#[test]
fn non_file_routes_are_never_candidates_for_suppression() {
    for route in ["chat", "web_search", "design", "dev"] {
        assert!(!is_file_producing_route(route));
    }
}
