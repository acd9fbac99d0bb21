use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use tutorline_core::ChatRole;

use crate::app::{App, InputMode, Overlay, TextInput};

/// Render `**bold**` runs; everything else is literal.
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("**") {
        let after_open = &rest[start + 2..];
        let Some(len) = after_open.find("**") else {
            break;
        };
        if len == 0 {
            // "****" has nothing to embolden
            spans.push(Span::raw(rest[..start + 4].to_string()));
            rest = &rest[start + 4..];
            continue;
        }

        if start > 0 {
            spans.push(Span::raw(rest[..start].to_string()));
        }
        spans.push(Span::styled(
            after_open[..len].to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        rest = &after_open[len + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// Visible window of a text field that keeps the cursor on screen.
fn visible_slice(input: &TextInput, width: usize) -> (String, usize) {
    let scroll_offset = if width == 0 || input.cursor < width {
        0
    } else {
        input.cursor - width + 1
    };
    let visible: String = input.text.chars().skip(scroll_offset).take(width).collect();
    (visible, input.cursor - scroll_offset)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat_screen(app, frame, body_area);
    render_footer(app, frame, footer_area);

    match app.overlay {
        Overlay::Unlock => render_unlock(app, frame, area),
        Overlay::Settings => render_settings(app, frame, area),
        Overlay::None => {}
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let endpoint = app.conversation.endpoint();
    let endpoint_label = if endpoint.is_default() {
        " [default webhook]".to_string()
    } else {
        format!(" [{}]", endpoint.primary_url)
    };

    let title = Line::from(vec![
        Span::styled(" Tutorline ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(endpoint_label, Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match (app.overlay, app.input_mode) {
        (Overlay::Unlock, _) => " LOCKED ",
        (Overlay::Settings, _) => " SETTINGS ",
        (Overlay::None, InputMode::Normal) => " CHAT ",
        (Overlay::None, InputMode::Editing) => " TYPE ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hint = |key: &'static str, label: &'static str| {
        [Span::styled(key, key_style), Span::styled(label, label_style)]
    };

    let hints: Vec<Span> = match (app.overlay, app.input_mode) {
        (Overlay::Unlock, _) => [hint(" Enter ", " unlock "), hint(" Esc ", " quit ")].concat(),
        (Overlay::Settings, _) => [
            hint(" Enter ", " save "),
            hint(" ^R ", " restore default "),
            hint(" Esc ", " cancel "),
        ]
        .concat(),
        (Overlay::None, InputMode::Normal) => [
            hint(" i ", " type "),
            hint(" j/k ", " scroll "),
            hint(" n ", " new chat "),
            hint(" s ", " settings "),
            hint(" q ", " quit "),
        ]
        .concat(),
        (Overlay::None, InputMode::Editing) => [
            hint(" Enter ", " send "),
            hint(" /attach ", " file "),
            hint(" Esc ", " stop typing "),
        ]
        .concat(),
    };

    let mut spans = vec![
        Span::styled(mode_text, mode_style),
        Span::styled(" ", label_style),
    ];
    spans.extend(hints);
    if let Some(status) = &app.status {
        spans.push(Span::styled(
            format!("  {}", status),
            Style::default().bg(Color::Black).fg(Color::Yellow),
        ));
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let attachment_height = if app.attachment.is_some() { 1 } else { 0 };
    let [chat_area, attachment_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(attachment_height),
        Constraint::Length(3),
    ])
    .areas(area);

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Your tutor ");

    let session = app.conversation.session();
    let chat_text = if session.turns().is_empty() && !session.is_awaiting_reply() {
        Text::from(Span::styled(
            "Ask your tutor anything: homework, study plans, practice problems...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for turn in session.turns() {
            match turn.role {
                ChatRole::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                    for line in turn.text.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                ChatRole::Assistant => {
                    lines.push(Line::from(Span::styled(
                        "Tutor:",
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    )));
                    for line in turn.text.lines() {
                        lines.push(parse_markdown_line(line));
                    }
                }
            }
            lines.push(Line::default());
        }

        if session.is_awaiting_reply() {
            lines.push(Line::from(Span::styled(
                "Tutor:",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        } else if let Some(error) = session.last_error() {
            lines.push(Line::from(Span::styled(
                error.to_string(),
                Style::default().fg(Color::Red),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, chat_area);

    if let Some(file) = &app.attachment {
        let label = Paragraph::new(format!(" 📎 {} (/detach to remove)", file.name))
            .style(Style::default().fg(Color::Magenta));
        frame.render_widget(label, attachment_area);
    }

    // Input at the bottom - highlight when editing
    let editing = app.overlay == Overlay::None && app.input_mode == InputMode::Editing;
    let input_border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let input_title = if app.is_sending() {
        " Waiting for the tutor... "
    } else {
        " Message "
    };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border_color))
        .title(input_title);

    let inner_width = input_area.width.saturating_sub(2) as usize;
    let (visible_text, cursor_x) = visible_slice(&app.input, inner_width);
    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, input_area);

    if editing {
        frame.set_cursor_position((input_area.x + cursor_x as u16 + 1, input_area.y + 1));
    }
}

/// Centered popup with a border; returns the inner area.
/// Clamped to `area` on short or narrow terminals.
fn popup(frame: &mut Frame, area: Rect, width: u16, height: u16, title: &str) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height);
    let popup_x = area.x + area.width.saturating_sub(popup_width) / 2;
    let popup_y = area.y + area.height.saturating_sub(popup_height) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(format!(" {} ", title));
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);
    inner
}

/// Row `offset` of a popup's inner area, if the popup is tall enough for it.
fn popup_row(inner: Rect, offset: u16) -> Option<Rect> {
    (offset < inner.height && inner.width > 0)
        .then(|| Rect::new(inner.x, inner.y + offset, inner.width, 1))
}

fn render_settings(app: &App, frame: &mut Frame, area: Rect) {
    let inner = popup(frame, area, 72, 7, "Chat webhook");

    let instructions = Paragraph::new("Webhook URL. Enter to save, Ctrl+R to restore the default, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    if let Some(row) = popup_row(inner, 0) {
        frame.render_widget(instructions, row);
    }

    if let Some(input_area) = popup_row(inner, 2) {
        let (visible_text, cursor_x) = visible_slice(&app.settings_input, inner.width as usize);
        frame.render_widget(
            Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan)),
            input_area,
        );
        frame.set_cursor_position((input_area.x + cursor_x as u16, input_area.y));
    }

    if let Some(row) = popup_row(inner, 4) {
        let relays = app.conversation.endpoint().relays().len();
        let status =
            Paragraph::new(format!("Tried through {} relays before the direct URL", relays))
                .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(status, row);
    }
}

fn render_unlock(app: &App, frame: &mut Frame, area: Rect) {
    let inner = popup(frame, area, 50, 6, "Tutorline beta");

    let instructions = Paragraph::new("Enter the site password to continue.")
        .style(Style::default().fg(Color::DarkGray));
    if let Some(row) = popup_row(inner, 0) {
        frame.render_widget(instructions, row);
    }

    if let Some(input_area) = popup_row(inner, 2) {
        let masked = "*".repeat(app.unlock_input.text.chars().count());
        frame.render_widget(
            Paragraph::new(masked).style(Style::default().fg(Color::Cyan)),
            input_area,
        );
        let cursor_x = app.unlock_input.cursor.min(input_area.width as usize) as u16;
        frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
    }
}
