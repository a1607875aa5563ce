use crate::dns::{SortBy, StoreHandle};

pub struct App {
    pub store: StoreHandle,
    pub sort_by: SortBy,
    pub filter: String,
    pub filter_input: String,
    pub filter_mode: bool,
    pub scroll_state: usize,
}

impl App {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            sort_by: SortBy::LastSeen,
            filter: String::new(),
            filter_input: String::new(),
            filter_mode: false,
            scroll_state: 0,
        }
    }

    pub fn active_filter(&self) -> Option<&str> {
        if self.filter.is_empty() {
            None
        } else {
            Some(self.filter.as_str())
        }
    }

    /// Number of rows the table currently shows.
    pub fn row_count(&self) -> usize {
        self.store.processes(self.sort_by, self.active_filter()).len()
    }

    pub fn toggle_sort(&mut self) {
        self.sort_by = match self.sort_by {
            SortBy::LastSeen => SortBy::Count,
            SortBy::Count => SortBy::Name,
            SortBy::Name => SortBy::LastSeen,
        };
        self.scroll_state = 0;
    }

    pub fn enter_filter_mode(&mut self) {
        self.filter_mode = true;
        self.filter_input = self.filter.clone();
    }

    pub fn exit_filter_mode(&mut self) {
        self.filter_mode = false;
        self.filter_input.clear();
    }

    pub fn apply_filter(&mut self) {
        self.filter = std::mem::take(&mut self.filter_input);
        self.filter_mode = false;
        self.scroll_state = 0;
    }

    pub fn filter_input_char(&mut self, c: char) {
        self.filter_input.push(c);
    }

    pub fn filter_backspace(&mut self) {
        self.filter_input.pop();
    }

    pub fn scroll_up(&mut self) {
        self.scroll_state = self.scroll_state.saturating_sub(1);
    }

    pub fn scroll_down(&mut self, max: usize) {
        if self.scroll_state < max.saturating_sub(1) {
            self.scroll_state += 1;
        }
    }

    pub fn page_up(&mut self) {
        self.scroll_state = self.scroll_state.saturating_sub(10);
    }

    pub fn page_down(&mut self, max: usize) {
        self.scroll_state = (self.scroll_state + 10).min(max.saturating_sub(1));
    }

    pub fn home(&mut self) {
        self.scroll_state = 0;
    }

    pub fn end(&mut self, max: usize) {
        self.scroll_state = max.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{CapturedPacket, Correlator, RetentionPolicy};
    use crate::process::ProcessInfo;

    fn app() -> App {
        let correlator = Correlator::new(
            |port: u16| {
                Some(ProcessInfo {
                    pid: u32::from(port),
                    name: format!("proc{}", port % 3),
                })
            },
            RetentionPolicy::default(),
        );
        for port in 1..=6 {
            correlator.record(&CapturedPacket::query("example.com", 1, port));
        }
        App::new(correlator.store())
    }

    #[test]
    fn sort_cycles_and_resets_scroll() {
        let mut app = app();
        app.scroll_state = 2;
        app.toggle_sort();
        assert_eq!(app.sort_by, SortBy::Count);
        assert_eq!(app.scroll_state, 0);
        app.toggle_sort();
        app.toggle_sort();
        assert_eq!(app.sort_by, SortBy::LastSeen);
    }

    #[test]
    fn filter_edit_then_apply() {
        let mut app = app();
        assert_eq!(app.row_count(), 3);

        app.enter_filter_mode();
        app.filter_input_char('p');
        app.filter_input_char('x');
        app.filter_backspace();
        app.filter_input_char('1');
        app.filter_input_char('o');
        app.filter_backspace();
        app.filter_backspace();
        app.filter_input_char('r');
        assert!(app.filter_mode);
        assert_eq!(app.filter_input, "pr");

        app.exit_filter_mode();
        assert_eq!(app.filter, "");

        app.enter_filter_mode();
        for c in "proc1".chars() {
            app.filter_input_char(c);
        }
        app.apply_filter();
        assert!(!app.filter_mode);
        assert_eq!(app.active_filter(), Some("proc1"));
        assert_eq!(app.row_count(), 1);
    }

    #[test]
    fn scrolling_stays_in_bounds() {
        let mut app = app();
        let rows = app.row_count();

        app.scroll_up();
        assert_eq!(app.scroll_state, 0);
        app.page_down(rows);
        assert_eq!(app.scroll_state, rows - 1);
        app.scroll_down(rows);
        assert_eq!(app.scroll_state, rows - 1);
        app.home();
        assert_eq!(app.scroll_state, 0);
        app.end(rows);
        assert_eq!(app.scroll_state, rows - 1);
        app.page_up();
        assert_eq!(app.scroll_state, 0);
    }
}
