//! HTML bodies for lifecycle emails.

use chrono::NaiveDateTime;

use crate::config::BrandingConfig;
use crate::entitlement::{format_rupees, BillingPeriod};

const CRITICAL_COLOR: &str = "#DC2626";
const WARNING_COLOR: &str = "#F59E0B";
const NOTICE_COLOR: &str = "#3B82F6";

const BUTTON_STYLE: &str = "display: inline-block; background: linear-gradient(135deg, #4F46E5 0%, #4338CA 100%); \
     color: #ffffff; text-decoration: none; padding: 14px 32px; border-radius: 8px; font-size: 16px; font-weight: 600;";

/// A rendered email ready to hand to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// How urgent a renewal reminder is, by days left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Critical,
    Warning,
    Notice,
}

impl Urgency {
    pub fn for_days(days: i64) -> Self {
        if days <= 1 {
            Urgency::Critical
        } else if days <= 3 {
            Urgency::Warning
        } else {
            Urgency::Notice
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Urgency::Critical => CRITICAL_COLOR,
            Urgency::Warning => WARNING_COLOR,
            Urgency::Notice => NOTICE_COLOR,
        }
    }
}

/// Minimal HTML escaping for interpolated user data.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn detail_row(label: &str, value: &str, value_color: &str) -> String {
    format!(
        r#"<tr>
                    <td style="padding: 8px 0; color: #6B7280;">{label}</td>
                    <td style="padding: 8px 0; color: {value_color}; font-weight: 600; text-align: right;">{value}</td>
                  </tr>"#
    )
}

fn details_box(rows: &[String]) -> String {
    format!(
        r#"<div style="background-color: #F3F4F6; border-radius: 8px; padding: 24px; margin: 24px 0;">
                <table style="width: 100%; border-collapse: collapse;">
                  {}
                </table>
              </div>"#,
        rows.join("\n                  ")
    )
}

fn paragraph(inner: &str) -> String {
    format!(r#"<p style="color: #374151; font-size: 16px; margin-bottom: 24px;">{inner}</p>"#)
}

fn button(href: &str, label: &str) -> String {
    format!(
        r#"<div style="text-align: center; margin: 32px 0;">
                <a href="{}" style="{BUTTON_STYLE}">{label} →</a>
              </div>"#,
        escape(href)
    )
}

/// Wrap a header and body in the shared email chrome.
fn layout(branding: &BrandingConfig, title: &str, header: &str, body: &str, year: i32) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="margin: 0; padding: 0; font-family: 'Segoe UI', sans-serif; background-color: #f4f7fa;">
  <table style="width: 100%; border-collapse: collapse;">
    <tr>
      <td align="center" style="padding: 40px 0;">
        <table style="width: 600px; max-width: 100%; background-color: #ffffff; border-radius: 12px; box-shadow: 0 4px 6px rgba(0, 0, 0, 0.1);">
          <tr>
            {header}
          </tr>
          <tr>
            <td style="padding: 40px;">
              {body}
            </td>
          </tr>
          <tr>
            <td style="padding: 24px 40px; background-color: #F9FAFB; border-radius: 0 0 12px 12px; text-align: center;">
              <p style="margin: 0; color: #9CA3AF; font-size: 12px;">© {year} {holder}. All rights reserved.</p>
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#,
        holder = escape(&branding.copyright_holder),
    )
}

/// Reminder for an entitlement ending in `days_until_expiry` days.
pub fn renewal_reminder(
    branding: &BrandingConfig,
    user_name: &str,
    feature_name: &str,
    price_paise: i64,
    billing_period: BillingPeriod,
    days_until_expiry: i64,
    year: i32,
) -> RenderedEmail {
    let urgency = Urgency::for_days(days_until_expiry);
    let color = urgency.color();
    let plural = if days_until_expiry == 1 { "" } else { "s" };
    let urgency_text = if urgency == Urgency::Critical {
        "expires tomorrow".to_string()
    } else {
        format!("expires in {days_until_expiry} days")
    };
    let call_to_action = if urgency == Urgency::Critical {
        "Renew now to avoid losing access!"
    } else {
        "Renew to continue enjoying premium features."
    };
    let price = format_rupees(price_paise);

    let user_name = escape(user_name);
    let feature = escape(feature_name);

    let header = format!(
        r#"<td style="padding: 40px; text-align: center; background: linear-gradient(135deg, {color} 0%, {color}dd 100%); border-radius: 12px 12px 0 0;">
              <h1 style="margin: 0; color: #ffffff; font-size: 24px;">⏰ Renewal Reminder</h1>
              <p style="margin: 10px 0 0; color: #ffffffcc; font-size: 16px;">Your {feature} subscription {urgency_text}</p>
            </td>"#
    );

    let body = [
        paragraph(&format!("Hi <strong>{user_name}</strong>,")),
        paragraph(&format!(
            "Your <strong>{feature}</strong> add-on subscription is expiring soon. {call_to_action}"
        )),
        details_box(&[
            detail_row("Feature", &feature, "#1F2937"),
            detail_row(
                "Renewal Price",
                &format!("{price}/{}", billing_period.unit()),
                "#1F2937",
            ),
            detail_row(
                "Days Remaining",
                &format!("{days_until_expiry} day{plural}"),
                color,
            ),
        ]),
        button(&branding.manage_url, "Renew Now"),
    ]
    .join("\n              ");

    RenderedEmail {
        subject: format!(
            "⏰ Your {feature_name} subscription expires in {days_until_expiry} day{plural}"
        ),
        html: layout(branding, "Renewal Reminder", &header, &body, year),
    }
}

/// Notice that an entitlement has expired.
pub fn subscription_expired(
    branding: &BrandingConfig,
    user_name: &str,
    feature_name: &str,
    year: i32,
) -> RenderedEmail {
    let user_name = escape(user_name);
    let feature = escape(feature_name);

    let header = r#"<td style="padding: 40px; text-align: center; background: linear-gradient(135deg, #6B7280 0%, #4B5563 100%); border-radius: 12px 12px 0 0;">
              <h1 style="margin: 0; color: #ffffff; font-size: 24px;">Subscription Expired</h1>
            </td>"#;

    let body = [
        paragraph(&format!("Hi <strong>{user_name}</strong>,")),
        paragraph(&format!(
            "Your <strong>{feature}</strong> add-on subscription has expired. \
             You no longer have access to this premium feature."
        )),
        paragraph("Resubscribe anytime to regain access to all the premium features you love."),
        button(&branding.addons_url, "Resubscribe"),
    ]
    .join("\n              ");

    RenderedEmail {
        subject: format!("Your {feature_name} subscription has expired"),
        html: layout(branding, "Subscription Expired", header, &body, year),
    }
}

/// Confirmation of a successful auto-renewal.
pub fn auto_renewal_success(
    branding: &BrandingConfig,
    user_name: &str,
    feature_name: &str,
    amount_paise: i64,
    new_end_date: NaiveDateTime,
    year: i32,
) -> RenderedEmail {
    let user_name = escape(user_name);
    let feature = escape(feature_name);

    let header = r#"<td style="padding: 40px; text-align: center; background: linear-gradient(135deg, #10B981 0%, #059669 100%); border-radius: 12px 12px 0 0;">
              <div style="font-size: 48px; margin-bottom: 10px;">✓</div>
              <h1 style="margin: 0; color: #ffffff; font-size: 24px;">Auto-Renewal Successful!</h1>
            </td>"#;

    let body = [
        paragraph(&format!("Hi <strong>{user_name}</strong>,")),
        paragraph(&format!(
            "Your <strong>{feature}</strong> subscription has been automatically renewed. \
             You can continue enjoying all premium features without interruption."
        )),
        details_box(&[
            detail_row("Amount Charged", &format_rupees(amount_paise), "#1F2937"),
            detail_row("New Expiry Date", &format_expiry_date(new_end_date), "#1F2937"),
        ]),
        button(&branding.manage_url, "Manage Subscription"),
    ]
    .join("\n              ");

    RenderedEmail {
        subject: format!("✓ Your {feature_name} subscription has been renewed"),
        html: layout(branding, "Auto-Renewal Successful", header, &body, year),
    }
}

/// "March 5, 2026"
pub fn format_expiry_date(date: NaiveDateTime) -> String {
    date.format("%B %-d, %Y").to_string()
}
