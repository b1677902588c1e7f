//! PDF layout of a [`Report`]: a title page, one section per month (table,
//! a sub-table per type and a pie chart) and a trailing history bar chart.

use printpdf::path::{PaintMode, WindingOrder};
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Point,
    Polygon, Rgb,
};

use super::{HistoryBar, MonthSection, Report, ReportError, ReportLabels, ReportRow, TypeSection};

// US Letter
const PAGE_WIDTH: f32 = 215.9;
const PAGE_HEIGHT: f32 = 279.4;
const MARGIN: f32 = 18.0;

const ROW_HEIGHT: f32 = 6.5;
const TABLE_FONT_SIZE: f32 = 9.0;
/// ID, DATE, TYPE, DESCRIPTION, AMOUNT
const COLUMN_WIDTHS: [f32; 5] = [16.0, 26.0, 40.0, 52.0, 30.0];

const PIE_RADIUS: f32 = 32.0;
const BAR_HEIGHT: f32 = 6.0;
const BAR_MAX_WIDTH: f32 = 110.0;
const BAR_LABEL_WIDTH: f32 = 50.0;

const PALETTE: [(f32, f32, f32); 8] = [
    (0.27, 0.51, 0.71),
    (0.96, 0.64, 0.38),
    (0.40, 0.69, 0.38),
    (0.84, 0.37, 0.37),
    (0.58, 0.44, 0.72),
    (0.55, 0.43, 0.39),
    (0.89, 0.47, 0.76),
    (0.74, 0.74, 0.13),
];

fn rgb(r: f32, g: f32, b: f32) -> Color {
    Color::Rgb(Rgb::new(r, g, b, None))
}

fn black() -> Color {
    rgb(0.0, 0.0, 0.0)
}

fn palette(index: usize) -> Color {
    let (r, g, b) = PALETTE[index % PALETTE.len()];
    rgb(r, g, b)
}

/// The built-in fonts only cover WinAnsi; fold common accents and replace
/// anything else.
fn pdf_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'Á' | 'À' | 'Ä' | 'Â' => 'A',
            'É' | 'È' | 'Ë' | 'Ê' => 'E',
            'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
            'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
            'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
            'ñ' => 'n',
            'Ñ' => 'N',
            'ç' => 'c',
            'Ç' => 'C',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '?',
        })
        .collect()
}

/// Rough Helvetica advance; only used to centre short strings.
fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * 0.5 * 0.3528
}

fn rect_points(x: f32, y: f32, width: f32, height: f32) -> Vec<(Point, bool)> {
    vec![
        (Point::new(Mm(x), Mm(y)), false),
        (Point::new(Mm(x + width), Mm(y)), false),
        (Point::new(Mm(x + width), Mm(y + height)), false),
        (Point::new(Mm(x), Mm(y + height)), false),
    ]
}

/// Writes pages top to bottom, opening a new page when the next block does
/// not fit.
struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    /// Column labels repeated on every table page.
    header: [String; 5],
    /// Distance from the bottom edge of the next line to write.
    cursor: f32,
    pages: usize,
}

impl PageWriter {
    fn new(title: &str, labels: &ReportLabels) -> Result<Self, ReportError> {
        let (doc, page, layer) = PdfDocument::new(pdf_text(title), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| ReportError::Render(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| ReportError::Render(e.to_string()))?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            header: [
                labels.id.clone(),
                labels.date.clone(),
                labels.expense_type.clone(),
                labels.description.clone(),
                labels.amount.clone(),
            ],
            cursor: PAGE_HEIGHT - MARGIN,
            pages: 1,
        })
    }

    fn new_page(&mut self) {
        self.pages += 1;
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), format!("Layer {}", self.pages));
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.cursor = PAGE_HEIGHT - MARGIN;
    }

    fn ensure_space(&mut self, height: f32) {
        if self.cursor - height < MARGIN {
            self.new_page();
        }
    }

    fn text(&self, text: &str, size: f32, x: f32, y: f32, bold: bool) {
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(pdf_text(text), size, Mm(x), Mm(y), font);
    }

    fn centered(&self, text: &str, size: f32, y: f32, bold: bool) {
        let x = ((PAGE_WIDTH - text_width(text, size)) / 2.0).max(MARGIN);
        self.text(text, size, x, y, bold);
    }

    fn heading(&mut self, text: &str, size: f32) {
        // Keep the heading on the page of the first table rows.
        self.ensure_space(size * 0.8 + ROW_HEIGHT * 2.0);
        self.cursor -= size * 0.5;
        self.text(text, size, MARGIN, self.cursor, true);
        self.cursor -= size * 0.3;
    }

    fn fill_rect(&self, x: f32, y: f32, width: f32, height: f32, color: Color) {
        self.layer.set_fill_color(color);
        self.layer.add_polygon(Polygon {
            rings: vec![rect_points(x, y, width, height)],
            mode: PaintMode::Fill,
            winding_order: WindingOrder::NonZero,
        });
    }

    fn outline_rect(&self, x: f32, y: f32, width: f32, height: f32) {
        self.layer.set_outline_color(black());
        self.layer.set_outline_thickness(0.5);
        self.layer.add_line(Line {
            points: rect_points(x, y, width, height),
            is_closed: true,
        });
    }

    fn table_row(&self, cells: &[String; 5], background: Color, foreground: Color, bold: bool) {
        let mut x = MARGIN;
        for (cell, width) in cells.iter().zip(COLUMN_WIDTHS) {
            self.fill_rect(x, self.cursor, width, ROW_HEIGHT, background.clone());
            self.outline_rect(x, self.cursor, width, ROW_HEIGHT);
            self.layer.set_fill_color(foreground.clone());
            self.text(cell, TABLE_FONT_SIZE, x + 1.5, self.cursor + 2.0, bold);
            x += width;
        }
    }

    fn table_header(&mut self) {
        let labels = self.header.clone();
        self.cursor -= ROW_HEIGHT;
        self.table_row(&labels, rgb(0.5, 0.5, 0.5), rgb(0.96, 0.96, 0.96), true);
    }

    /// Expense table, repeating the header on every page it spans.
    fn table(&mut self, rows: &[ReportRow]) {
        self.ensure_space(ROW_HEIGHT * 2.0);
        self.table_header();
        for row in rows {
            if self.cursor - ROW_HEIGHT < MARGIN {
                self.new_page();
                self.table_header();
            }
            self.cursor -= ROW_HEIGHT;
            let cells = [
                row.id.to_string(),
                row.date.to_string(),
                row.expense_type.clone(),
                row.description.clone(),
                format!("{:.2}", row.amount),
            ];
            self.table_row(&cells, rgb(0.96, 0.96, 0.86), black(), false);
        }
        self.layer.set_fill_color(black());
        self.cursor -= ROW_HEIGHT / 2.0;
    }

    /// Pie of the per-type totals with a legend on its right.
    fn pie(&mut self, month: &MonthSection) {
        let total: i64 = month.by_type.iter().map(|t| t.total).sum();
        if total <= 0 {
            return;
        }
        let legend_height = month.by_type.len() as f32 * ROW_HEIGHT;
        self.ensure_space((PIE_RADIUS * 2.0).max(legend_height) + ROW_HEIGHT);

        let cx = MARGIN + PIE_RADIUS;
        let cy = self.cursor - ROW_HEIGHT / 2.0 - PIE_RADIUS;
        let mut start = 90.0_f32;
        for (index, section) in month.by_type.iter().enumerate() {
            let sweep = 360.0 * section.total as f32 / total as f32;
            if sweep <= 0.0 {
                continue;
            }
            let mut ring = vec![(Point::new(Mm(cx), Mm(cy)), false)];
            let steps = (sweep / 2.0).ceil().max(1.0) as usize;
            for step in 0..=steps {
                let angle = (start - sweep * step as f32 / steps as f32).to_radians();
                ring.push((
                    Point::new(Mm(cx + PIE_RADIUS * angle.cos()), Mm(cy + PIE_RADIUS * angle.sin())),
                    false,
                ));
            }
            self.layer.set_fill_color(palette(index));
            self.layer.add_polygon(Polygon {
                rings: vec![ring],
                mode: PaintMode::Fill,
                winding_order: WindingOrder::NonZero,
            });
            start -= sweep;
        }

        let legend_x = MARGIN + PIE_RADIUS * 2.0 + 12.0;
        let mut y = self.cursor - ROW_HEIGHT;
        for (index, section) in month.by_type.iter().enumerate() {
            self.fill_rect(legend_x, y, 4.0, 4.0, palette(index));
            self.layer.set_fill_color(black());
            let share = 100.0 * section.total as f32 / total as f32;
            let label = format!("{}  {} ({:.1}%)", section.expense_type, section.total, share);
            self.text(&label, 10.0, legend_x + 6.0, y + 0.5, false);
            y -= ROW_HEIGHT;
        }

        self.cursor -= (PIE_RADIUS * 2.0).max(legend_height) + ROW_HEIGHT;
    }

    /// Horizontal bars, one per month, scaled to the largest total.
    fn bar_chart(&mut self, bars: &[HistoryBar]) {
        let max = bars.iter().map(|b| b.total).max().unwrap_or(0).max(1) as f32;
        for (index, bar) in bars.iter().enumerate() {
            self.ensure_space(BAR_HEIGHT + 2.0);
            self.cursor -= BAR_HEIGHT + 2.0;
            self.layer.set_fill_color(black());
            self.text(
                &format!("{} - {}", bar.label, bar.total),
                10.0,
                MARGIN,
                self.cursor + 1.5,
                false,
            );
            let width = BAR_MAX_WIDTH * bar.total.max(0) as f32 / max;
            if width > 0.0 {
                self.fill_rect(MARGIN + BAR_LABEL_WIDTH, self.cursor, width, BAR_HEIGHT, palette(index));
            }
        }
        self.layer.set_fill_color(black());
    }

    fn finish(self) -> Result<Vec<u8>, ReportError> {
        self.doc
            .save_to_bytes()
            .map_err(|e| ReportError::Render(e.to_string()))
    }
}

/// "2024-03  Total: 392"
fn month_heading(month: &MonthSection, labels: &ReportLabels) -> String {
    format!("{}  {}: {}", month.label(), labels.total, month.total)
}

fn type_heading(section: &TypeSection, labels: &ReportLabels) -> String {
    format!("{}  {}: {}", section.expense_type, labels.total, section.total)
}

fn month_section(writer: &mut PageWriter, month: &MonthSection, labels: &ReportLabels) {
    writer.heading(&month_heading(month, labels), 16.0);
    writer.table(&month.rows);

    for section in &month.by_type {
        writer.heading(&type_heading(section, labels), 12.0);
        writer.table(&section.rows);
    }
    if month.by_type.iter().any(|t| t.total > 0) {
        // Keep the heading with its chart.
        writer.ensure_space(12.0 + PIE_RADIUS * 2.0 + ROW_HEIGHT * 2.0);
        writer.heading(&labels.by_type, 12.0);
        writer.pie(month);
    }
}

/// Render `report` into PDF bytes.
pub fn render(report: &Report) -> Result<Vec<u8>, ReportError> {
    let mut writer = PageWriter::new(&report.title, &report.labels)?;

    let middle = PAGE_HEIGHT / 2.0;
    writer.centered(&report.generated_on.format("%Y %m %d").to_string(), 14.0, middle + 12.0, false);
    writer.centered(&report.title, 26.0, middle, true);

    for month in &report.months {
        writer.new_page();
        month_section(&mut writer, month, &report.labels);
    }

    if !report.history.is_empty() {
        writer.new_page();
        writer.heading(&report.labels.history, 16.0);
        writer.bar_chart(&report.history);
    }

    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportBuilder;
    use crate::store::Expense;
    use chrono::NaiveDate;

    fn expense(id: i64, date: i64, expense_type: &str, amount: f64) -> Expense {
        Expense {
            id,
            date,
            user: "Nook".to_string(),
            expense_type: expense_type.to_string(),
            description: "ALIMENTACIÓN".to_string(),
            amount,
        }
    }

    #[test]
    fn test_pdf_text_folds_accents() {
        assert_eq!(pdf_text("ALIMENTACIÓN año"), "ALIMENTACION ano");
        assert_eq!(pdf_text("café €5"), "cafe ?5");
    }

    #[test]
    fn test_headings_use_labels() {
        let labels = ReportLabels {
            total: "Totale".to_string(),
            ..ReportLabels::default()
        };
        let report = ReportBuilder::new("Spese", std::env::temp_dir())
            .with_labels(labels.clone())
            .build(&[expense(1, 20240305, "FOOD", 12.5)], NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        let month = &report.months[0];
        assert_eq!(month_heading(month, &labels), "2024-03  Totale: 13");
        assert_eq!(type_heading(&month.by_type[0], &labels), "FOOD  Totale: 13");
        assert!(render(&report).unwrap().starts_with(b"%PDF"));
    }

    #[test]
    fn test_render_empty_report() {
        let report = ReportBuilder::new("Expenses Report", std::env::temp_dir())
            .build(&[], NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let bytes = render(&report).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_render_long_month_spans_pages() {
        let expenses: Vec<Expense> = (1..=120)
            .map(|id| expense(id, 20240105, if id % 2 == 0 { "FOOD" } else { "OTHER" }, id as f64 * 1.5))
            .collect();
        let report = ReportBuilder::new("Expenses Report", std::env::temp_dir())
            .build(&expenses, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        let bytes = render(&report).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(bytes.len() > 1000);
    }

    #[test]
    fn test_render_zero_amount_month() {
        let report = ReportBuilder::new("Expenses Report", std::env::temp_dir())
            .build(&[expense(1, 20240105, "FOOD", 0.0)], NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert!(render(&report).unwrap().starts_with(b"%PDF"));
    }
}
