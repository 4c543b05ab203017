//! Validation utilities

use crate::traits::*;
use crate::types::*;

/// Validate that a string is between a minimum and maximum length
pub fn validate_length(field: &str, value: &str, min: usize, max: usize) -> LedgerResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(LedgerError::Validation(format!(
            "{field} must contain between {min}-{max} characters"
        )));
    }
    Ok(())
}

/// Validate an account owner username
///
/// Usernames are 3-100 characters of lowercase letters, digits and underscores.
pub fn validate_owner(owner: &str) -> LedgerResult<()> {
    validate_length("Owner", owner, 3, 100)?;

    if !owner
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(LedgerError::Validation(
            "Owner must contain only lowercase alphanumeric characters and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        Err(LedgerError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that an account ID is valid
pub fn validate_account_id(account_id: i64) -> LedgerResult<()> {
    if account_id < 1 {
        return Err(LedgerError::Validation(format!(
            "Account ID must be at least 1, got {account_id}"
        )));
    }
    Ok(())
}

/// Parse a currency code, accepting only supported currencies
pub fn validate_currency(code: &str) -> LedgerResult<Currency> {
    code.parse()
}

/// Validate listing bounds: pages start at 1 and hold 5 to 10 rows
pub fn validate_page(page: &Page) -> LedgerResult<()> {
    if page.page_id < 1 {
        return Err(LedgerError::Validation(
            "Page ID must be at least 1".to_string(),
        ));
    }

    if !(Page::MIN_SIZE..=Page::MAX_SIZE).contains(&page.page_size) {
        return Err(LedgerError::Validation(format!(
            "Page size must be between {} and {}",
            Page::MIN_SIZE,
            Page::MAX_SIZE
        )));
    }

    Ok(())
}

/// Enhanced account validator with detailed checks
pub struct EnhancedAccountValidator;

impl AccountValidator for EnhancedAccountValidator {
    fn validate_new_account(&self, owner: &str, _currency: Currency) -> LedgerResult<()> {
        validate_owner(owner)
    }
}

/// Enhanced transfer validator with detailed checks
pub struct EnhancedTransferValidator;

impl TransferValidator for EnhancedTransferValidator {
    fn validate_request(&self, request: &TransferRequest) -> LedgerResult<()> {
        validate_account_id(request.from_account_id)?;
        validate_account_id(request.to_account_id)?;
        validate_positive_amount(request.amount)?;

        if request.from_account_id == request.to_account_id {
            return Err(LedgerError::Validation(
                "Cannot transfer to the same account".to_string(),
            ));
        }

        if let Some(owner) = &request.requested_by {
            validate_owner(owner)?;
        }

        Ok(())
    }
}
