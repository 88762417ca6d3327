use crate::db::{ColumnDescription, DatabaseManager, DbResult};
use crate::output::truncate;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::{
    Frame, Terminal,
    backend::Backend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Span, Text},
    widgets::{Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table, TableState},
};
use std::io;

const MAX_CELL_WIDTH: usize = 40;

#[derive(Debug, PartialEq)]
pub enum AppState {
    TableList,
    TableData,
    TableSchema,
    Error,
}

pub struct App {
    pub state: AppState,
    pub schema: String,
    pub tables_list_state: ListState,
    pub table_data_state: TableState,
    pub tables: Vec<String>,
    pub current_table: Option<String>,
    pub table_columns: Vec<String>,
    pub column_types: Vec<String>,
    pub table_data: Vec<Vec<String>>,
    pub description: Vec<ColumnDescription>,
    pub current_page: u32,
    pub max_page: u32,
    pub items_per_page: u32,
    pub total_rows: i64,
    pub error_message: Option<String>,
    pub status: Option<String>,
}

impl App {
    pub fn new(schema: impl Into<String>) -> App {
        App {
            state: AppState::TableList,
            schema: schema.into(),
            tables_list_state: ListState::default(),
            table_data_state: TableState::default(),
            tables: Vec::new(),
            current_table: None,
            table_columns: Vec::new(),
            column_types: Vec::new(),
            table_data: Vec::new(),
            description: Vec::new(),
            current_page: 0,
            max_page: 1,
            items_per_page: 20,
            total_rows: 0,
            error_message: None,
            status: None,
        }
    }

    pub fn show_error(&mut self, context: &str, err: impl std::fmt::Display) {
        tracing::warn!(error = %err, "{context}");
        self.error_message = Some(format!("{context}: {err}"));
        self.state = AppState::Error;
    }

    pub async fn load_tables(&mut self, db: &DatabaseManager) -> DbResult<()> {
        self.tables = db.list_tables().await?;
        self.schema = db.schema();
        self.tables_list_state
            .select(if self.tables.is_empty() { None } else { Some(0) });
        self.status = Some(format!(
            "Schema '{}': {} tables",
            self.schema,
            self.tables.len()
        ));
        Ok(())
    }

    /// Open the selected table on its first page.
    pub async fn open_selected(&mut self, db: &DatabaseManager) -> DbResult<()> {
        let Some(table) = self
            .tables_list_state
            .selected()
            .and_then(|i| self.tables.get(i))
            .cloned()
        else {
            return Ok(());
        };
        self.current_table = Some(table);
        self.current_page = 0;
        self.description = Vec::new();
        self.state = AppState::TableData;
        self.load_table_data(db).await
    }

    pub async fn load_table_data(&mut self, db: &DatabaseManager) -> DbResult<()> {
        let Some(table) = self.current_table.clone() else {
            return Ok(());
        };

        if self.description.is_empty() {
            self.description = db.describe_table(&table).await?;
        }
        self.total_rows = db.count_rows(&table).await?;
        self.max_page = Self::page_count(self.total_rows, self.items_per_page);

        let offset = i64::from(self.current_page) * i64::from(self.items_per_page);
        let page = db
            .table_page(&table, offset, i64::from(self.items_per_page))
            .await?;

        self.column_types = page
            .columns
            .iter()
            .map(|name| {
                self.description
                    .iter()
                    .find(|c| &c.name == name)
                    .map(|c| c.data_type.clone())
                    .unwrap_or_default()
            })
            .collect();
        self.table_columns = page.columns;
        self.table_data = page
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| truncate(&v.to_string(), MAX_CELL_WIDTH))
                    .collect()
            })
            .collect();

        self.table_data_state
            .select(if self.table_data.is_empty() { None } else { Some(0) });
        Ok(())
    }

    /// Pages needed for `total` rows; an empty table still has one page.
    pub fn page_count(total: i64, per_page: u32) -> u32 {
        let per_page = i64::from(per_page.max(1));
        let pages = (total.max(0) + per_page - 1) / per_page;
        u32::try_from(pages.max(1)).unwrap_or(u32::MAX)
    }

    pub fn next_table(&mut self) {
        if self.tables.is_empty() {
            return;
        }

        let i = match self.tables_list_state.selected() {
            Some(i) => {
                if i >= self.tables.len() - 1 {
                    0
                } else {
                    i + 1
                }
            }
            None => 0,
        };
        self.tables_list_state.select(Some(i));
    }

    pub fn previous_table(&mut self) {
        if self.tables.is_empty() {
            return;
        }

        let i = match self.tables_list_state.selected() {
            Some(i) => {
                if i == 0 {
                    self.tables.len() - 1
                } else {
                    i - 1
                }
            }
            None => 0,
        };
        self.tables_list_state.select(Some(i));
    }

    pub fn next_row(&mut self) {
        if self.table_data.is_empty() {
            return;
        }

        let i = match self.table_data_state.selected() {
            Some(i) => {
                if i >= self.table_data.len() - 1 {
                    0
                } else {
                    i + 1
                }
            }
            None => 0,
        };
        self.table_data_state.select(Some(i));
    }

    pub fn previous_row(&mut self) {
        if self.table_data.is_empty() {
            return;
        }

        let i = match self.table_data_state.selected() {
            Some(i) => {
                if i == 0 {
                    self.table_data.len() - 1
                } else {
                    i - 1
                }
            }
            None => 0,
        };
        self.table_data_state.select(Some(i));
    }

    /// Returns whether the page changed.
    pub fn next_page(&mut self) -> bool {
        if self.current_page + 1 < self.max_page {
            self.current_page += 1;
            true
        } else {
            false
        }
    }

    pub fn previous_page(&mut self) -> bool {
        if self.current_page > 0 {
            self.current_page -= 1;
            true
        } else {
            false
        }
    }

    fn back_to_tables(&mut self) {
        self.state = AppState::TableList;
        self.current_table = None;
        self.table_data.clear();
        self.description.clear();
    }
}

pub async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    db: &DatabaseManager,
) -> io::Result<()> {
    if let Err(e) = app.load_tables(db).await {
        app.show_error("Error loading tables", e);
    }

    loop {
        terminal.draw(|f| ui(f, app))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match app.state {
            AppState::TableList => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Down => app.next_table(),
                KeyCode::Up => app.previous_table(),
                KeyCode::Enter => {
                    if let Err(e) = app.open_selected(db).await {
                        app.show_error("Error loading table data", e);
                    }
                }
                KeyCode::Char('r') => {
                    if let Err(e) = app.load_tables(db).await {
                        app.show_error("Error loading tables", e);
                    }
                }
                _ => {}
            },
            AppState::TableData => match key.code {
                KeyCode::Char('q') => return Ok(()),
                KeyCode::Esc | KeyCode::Char('t') => app.back_to_tables(),
                KeyCode::Down => app.next_row(),
                KeyCode::Up => app.previous_row(),
                KeyCode::Char('d') => app.state = AppState::TableSchema,
                KeyCode::PageDown => {
                    if app.next_page()
                        && let Err(e) = app.load_table_data(db).await
                    {
                        app.show_error("Error loading table data", e);
                    }
                }
                KeyCode::PageUp => {
                    if app.previous_page()
                        && let Err(e) = app.load_table_data(db).await
                    {
                        app.show_error("Error loading table data", e);
                    }
                }
                _ => {}
            },
            AppState::TableSchema => match key.code {
                KeyCode::Char('q') => return Ok(()),
                KeyCode::Esc | KeyCode::Char('d') => app.state = AppState::TableData,
                KeyCode::Char('t') => app.back_to_tables(),
                _ => {}
            },
            AppState::Error => match key.code {
                KeyCode::Char('q') => return Ok(()),
                KeyCode::Esc | KeyCode::Char('t') => {
                    app.error_message = None;
                    app.back_to_tables();
                }
                _ => {}
            },
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0), Constraint::Length(1)])
        .split(f.area());

    let (line, color) = match (&app.error_message, &app.status) {
        (Some(error), _) => (error.as_str(), Color::Red),
        (None, Some(status)) => (status.as_str(), Color::Green),
        (None, None) => ("", Color::Reset),
    };
    f.render_widget(
        Paragraph::new(Text::styled(line, Style::default().fg(color))),
        chunks[0],
    );

    let help = match app.state {
        AppState::TableList => "Use ↑↓ to navigate, Enter to open, 'r' to reload, 'q' to quit",
        AppState::TableData => {
            "Use ↑↓ to navigate rows, PageUp/PageDown to change pages, 'd' for columns, 't' or ESC for tables, 'q' to quit"
        }
        AppState::TableSchema => "'d' or ESC back to data, 't' for tables, 'q' to quit",
        AppState::Error => "Press 't' or ESC to go back to tables, 'q' to quit",
    };

    match app.state {
        AppState::TableList => render_table_list(f, app, chunks[1]),
        AppState::TableData => render_table_data(f, app, chunks[1]),
        AppState::TableSchema => render_table_schema(f, app, chunks[1]),
        AppState::Error => render_error(f, app, chunks[1]),
    }

    f.render_widget(
        Paragraph::new(Span::raw(help)).style(Style::default().add_modifier(Modifier::ITALIC)),
        chunks[2],
    );
}

fn render_table_list(f: &mut Frame, app: &mut App, area: Rect) {
    let items: Vec<ListItem> = app
        .tables
        .iter()
        .map(|name| ListItem::new(name.as_str()))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Tables in {}", app.schema)),
        )
        .highlight_style(
            Style::default()
                .bg(Color::LightGreen)
                .add_modifier(Modifier::BOLD),
        );

    f.render_stateful_widget(list, area, &mut app.tables_list_state);
}

fn render_table_data(f: &mut Frame, app: &mut App, area: Rect) {
    // Column name over its type.
    let header = Row::new(
        app.table_columns
            .iter()
            .zip(&app.column_types)
            .map(|(name, data_type)| Cell::from(format!("{name}\n{data_type}"))),
    )
    .height(2)
    .style(Style::default().add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = app
        .table_data
        .iter()
        .map(|row| Row::new(row.iter().map(|cell| Cell::from(cell.as_str()))))
        .collect();

    let widths: Vec<Constraint> = app
        .table_columns
        .iter()
        .map(|_| Constraint::Percentage(100 / app.table_columns.len().max(1) as u16))
        .collect();

    let title = format!(
        "Table: {} ({} rows, page {}/{})",
        app.current_table.as_deref().unwrap_or("Unknown"),
        app.total_rows,
        app.current_page + 1,
        app.max_page
    );
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(Style::default().bg(Color::LightBlue));

    f.render_stateful_widget(table, area, &mut app.table_data_state);
}

fn render_table_schema(f: &mut Frame, app: &mut App, area: Rect) {
    let header = Row::new(["Column", "Type", "Nullable", "Default"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows: Vec<Row> = app
        .description
        .iter()
        .map(|c| {
            Row::new([
                c.name.clone(),
                c.data_type.clone(),
                c.nullable.clone(),
                c.default.clone(),
            ])
        })
        .collect();
    let widths = [
        Constraint::Percentage(25),
        Constraint::Percentage(25),
        Constraint::Percentage(10),
        Constraint::Percentage(40),
    ];

    let table = Table::new(rows, widths).header(header).block(
        Block::default().borders(Borders::ALL).title(format!(
            "Columns of {}",
            app.current_table.as_deref().unwrap_or("Unknown")
        )),
    );
    f.render_widget(table, area);
}

fn render_error(f: &mut Frame, app: &mut App, area: Rect) {
    let text = app
        .error_message
        .as_deref()
        .unwrap_or("Unknown error occurred");

    let paragraph = Paragraph::new(Span::raw(text))
        .block(Block::default().borders(Borders::ALL).title("Error"))
        .style(Style::default().fg(Color::Red));
    f.render_widget(paragraph, area);
}
