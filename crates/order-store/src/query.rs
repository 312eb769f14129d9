use domain::{Order, OrderStatus, Priority};

/// Ordering of a listing by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Builder for constructing order listings.
///
/// All filters are optional and combine with AND. `search` is a
/// case-insensitive substring match over order number, department name and
/// requester name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    /// Filter by status.
    pub status: Option<OrderStatus>,

    /// Filter by requesting department.
    pub department_id: Option<String>,

    /// Filter by priority.
    pub priority: Option<Priority>,

    /// Free-text match.
    pub search: Option<String>,

    pub sort: SortOrder,

    /// Maximum number of orders to return.
    pub limit: Option<usize>,

    /// Number of orders to skip.
    pub offset: Option<usize>,
}

impl OrderQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn department_id(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the free-text match; blank text is ignored.
    pub fn search(mut self, text: impl Into<String>) -> Self {
        let text = text.into().trim().to_string();
        self.search = (!text.is_empty()).then_some(text);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Limits the number of orders returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many orders before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if `order` passes every filter.
    pub fn matches(&self, order: &Order) -> bool {
        let header = order.header();

        if let Some(status) = self.status
            && order.status() != status
        {
            return false;
        }
        if let Some(ref department_id) = self.department_id
            && &header.department_id != department_id
        {
            return false;
        }
        if let Some(priority) = self.priority
            && header.priority != priority
        {
            return false;
        }
        if let Some(ref text) = self.search {
            let needle = text.to_lowercase();
            let haystacks = [
                order.order_number().to_string(),
                header.department_name.clone(),
                header.requester_name.clone(),
            ];
            if !haystacks
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        true
    }
}
