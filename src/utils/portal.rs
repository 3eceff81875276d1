use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thirtyfour::prelude::*;
use crate::config::Settings;
use crate::error::{GradeError, Result};
use crate::models::{Credentials, DistributionTable, GradeSnapshot, Term};
use crate::poll::Fetcher;
use crate::utils::grades::{parse_distribution, parse_grades};

const USERNAME_FIELD: &str = "userNameInput";
const PASSWORD_FIELD: &str = "passwordInput";
const STUDENT_MENU: &str = "submenu-button-1";
const GRADES_ENTRY: &str = r#"a[data-select-value="1030"]"#;
const TERM_RADIO_PREFIX: &str = "SSR_DUMMY_RECV1$sels$";
const VIEW_GRADES_LINK: &str =
    "//li[@data-gh-page-link='SSR_SSENRL_TERM' and @data-gh-item-link='DERIVED_SSS_SCT_SSR_PB_GO']//a";
const DETAILS_TOGGLE: &str = ".toggle.fa.fa-angle-down.label-false.ui-btn.gh-btn";
const DISTRIBUTION_LINK: &str = "Grade Distribution";

pub const GRADES_FILE: &str = "grades.html";
pub const DISTRIBUTION_FILE: &str = "dist.html";

// Settle delays after each browser step; the portal gives no usable readiness signal.
const OPEN_SETTLE: Duration = Duration::from_millis(1000);
pub const LOGIN_SETTLE: Duration = Duration::from_millis(6000);
const MENU_SETTLE: Duration = Duration::from_millis(2000);
const GRADES_ENTRY_SETTLE: Duration = Duration::from_millis(4000);
const TERM_VIEW_SETTLE: Duration = Duration::from_millis(2000);
const PAGE_SETTLE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    Id(&'a str),
    Css(&'a str),
    XPath(&'a str),
    LinkText(&'a str),
}

impl fmt::Display for Locator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(v) => write!(f, "id={v}"),
            Locator::Css(v) => write!(f, "css={v}"),
            Locator::XPath(v) => write!(f, "xpath={v}"),
            Locator::LinkText(v) => write!(f, "link={v}"),
        }
    }
}

/// The slice of browser control the portal workflow needs.
#[async_trait(?Send)]
pub trait PortalDriver {
    async fn open(&self, url: &str) -> Result<()>;
    /// Clears the field and types `text` into it.
    async fn fill(&self, field: Locator<'_>, text: &str) -> Result<()>;
    /// Presses return inside the field.
    async fn submit(&self, field: Locator<'_>) -> Result<()>;
    async fn click(&self, target: Locator<'_>) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn page_source(&self) -> Result<String>;
}

// Maps a locator onto the WebDriver query it stands for.
fn by(locator: Locator<'_>) -> By {
    match locator {
        Locator::Id(v) => By::Id(v),
        Locator::Css(v) => By::Css(v),
        Locator::XPath(v) => By::XPath(v),
        Locator::LinkText(v) => By::LinkText(v),
    }
}

// Wraps a driver failure as a navigation error naming the step.
fn navigation<E: fmt::Display>(what: impl fmt::Display) -> impl FnOnce(E) -> GradeError {
    move |e| GradeError::Navigation(format!("{what}: {e}"))
}

#[async_trait(?Send)]
impl PortalDriver for WebDriver {
    async fn open(&self, url: &str) -> Result<()> {
        self.goto(url).await.map_err(navigation(format!("open {url}")))
    }

    async fn fill(&self, field: Locator<'_>, text: &str) -> Result<()> {
        let element = self.find(by(field)).await.map_err(navigation(field))?;
        element.clear().await.map_err(navigation(field))?;
        element.send_keys(text).await.map_err(navigation(field))
    }

    async fn submit(&self, field: Locator<'_>) -> Result<()> {
        let element = self.find(by(field)).await.map_err(navigation(field))?;
        element.send_keys(Key::Enter).await.map_err(navigation(field))
    }

    async fn click(&self, target: Locator<'_>) -> Result<()> {
        let element = self.find(by(target)).await.map_err(navigation(target))?;
        element.click().await.map_err(navigation(target))
    }

    async fn current_url(&self) -> Result<String> {
        let url = (**self).current_url().await.map_err(navigation("read location"))?;
        Ok(url.to_string())
    }

    async fn page_source(&self) -> Result<String> {
        self.source().await.map_err(navigation("read page source"))
    }
}

/// One authenticated pass through the portal.
pub struct Session<'a, D: PortalDriver> {
    driver: &'a D,
    settings: &'a Settings,
}

impl<'a, D: PortalDriver> Session<'a, D> {
    // Borrows a live driver for one pass; the caller owns teardown.
    pub fn new(driver: &'a D, settings: &'a Settings) -> Self {
        Session { driver, settings }
    }

    // Fixed wait after a browser step, scaled by SETTLE_SCALE.
    async fn settle(&self, base: Duration) {
        let delay = self.settings.settle(base);
        debug!("Waiting {delay:?} for the page to settle");
        tokio::time::sleep(delay).await;
    }

    // Signs in, opens the grades area and returns the terms it offers.
    pub async fn login(&self, credentials: &Credentials) -> Result<Vec<Term>> {
        self.driver.open(self.settings.portal_url.as_str()).await?;
        self.settle(OPEN_SETTLE).await;

        self.driver.fill(Locator::Id(USERNAME_FIELD), &credentials.username).await?;
        self.driver.fill(Locator::Id(PASSWORD_FIELD), &credentials.password).await?;
        self.driver.submit(Locator::Id(PASSWORD_FIELD)).await?;
        self.settle(LOGIN_SETTLE).await;

        let location = self.driver.current_url().await?;
        if location != self.settings.home_url.as_str() {
            return Err(GradeError::Authentication { location });
        }
        info!("Login successful");

        self.driver.click(Locator::Id(STUDENT_MENU)).await?;
        self.settle(MENU_SETTLE).await;
        self.driver.click(Locator::Css(GRADES_ENTRY)).await?;
        self.settle(GRADES_ENTRY_SETTLE).await;
        debug!("Grades area at {}", self.driver.current_url().await?);
        info!("Grade access successful");

        match &self.settings.term_mapping {
            Some(terms) => Ok(terms.clone()),
            None => discover_terms(&self.driver.page_source().await?),
        }
    }

    // Picks `label` from the offered terms. Nothing is clicked when it is absent.
    pub async fn select_term(&self, terms: &[Term], label: &str) -> Result<Term> {
        let term = terms
            .iter()
            .find(|t| t.matches(label))
            .cloned()
            .ok_or_else(|| GradeError::UnsupportedTerm {
                term: label.to_string(),
                offered: terms.iter().map(|t| t.label.clone()).collect(),
            })?;

        self.settle(TERM_VIEW_SETTLE).await;
        let radio = term_radio_id(term.index);
        self.driver.click(Locator::Id(&radio)).await?;
        info!("Selected term {} (#{})", term.label, term.index);
        Ok(term)
    }

    // Opens the grades page, then the distribution page, capturing and parsing each.
    pub async fn fetch_tables(&self) -> Result<(GradeSnapshot, DistributionTable)> {
        self.driver.click(Locator::XPath(VIEW_GRADES_LINK)).await?;
        self.settle(PAGE_SETTLE).await;
        let grades = parse_grades(&self.capture(GRADES_FILE).await?)?;

        self.driver.click(Locator::Css(DETAILS_TOGGLE)).await?;
        self.driver.click(Locator::LinkText(DISTRIBUTION_LINK)).await?;
        self.settle(PAGE_SETTLE).await;
        let distribution = parse_distribution(&self.capture(DISTRIBUTION_FILE).await?, &grades)?;

        Ok((grades, distribution))
    }

    // Writes the rendered page to the work dir and parses from that copy.
    async fn capture(&self, name: &str) -> Result<String> {
        let path: PathBuf = self.settings.work_dir.join(name);
        fs::write(&path, self.driver.page_source().await?)?;
        debug!("Saved page to {}", path.display());
        Ok(fs::read_to_string(&path)?)
    }
}

// Element id of the radio button for the term at `index`.
pub fn term_radio_id(index: usize) -> String {
    format!("{TERM_RADIO_PREFIX}{index}$$0")
}

// Reads the term radio buttons off the term selection page.
pub fn discover_terms(html: &str) -> Result<Vec<Term>> {
    let document = Html::parse_document(html);
    let radio_selector = Selector::parse(&format!(r#"input[id^="{TERM_RADIO_PREFIX}"]"#))
        .map_err(|e| GradeError::Parse(format!("bad term selector: {e}")))?;
    let td_selector = Selector::parse("td").map_err(|e| GradeError::Parse(format!("bad term selector: {e}")))?;
    let id_pattern = Regex::new(&format!(r"^{}(\d+)\$\$0$", regex::escape(TERM_RADIO_PREFIX)))
        .map_err(|e| GradeError::Parse(format!("bad term pattern: {e}")))?;

    let mut terms = Vec::new();
    for radio in document.select(&radio_selector) {
        let Some(index) = radio
            .value()
            .id()
            .and_then(|id| id_pattern.captures(id))
            .and_then(|c| c[1].parse().ok())
        else {
            continue;
        };
        let label = radio
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "tr")
            .and_then(|tr| {
                tr.select(&td_selector)
                    .map(|td| td.text().collect::<Vec<_>>().join(" "))
                    .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
                    .find(|text| !text.is_empty())
            });
        match label {
            Some(label) => terms.push(Term { label, index }),
            None => warn!("Term radio #{index} has no label, skipping"),
        }
    }

    if terms.is_empty() {
        return Err(GradeError::Parse("no terms offered on the term selection page".into()));
    }
    terms.sort_by_key(|t| t.index);
    Ok(terms)
}

// Fetches both tables through a fresh WebDriver session each call.
pub struct PortalFetcher {
    pub settings: Settings,
    pub credentials: Credentials,
    pub term: String,
}

#[async_trait(?Send)]
impl Fetcher for PortalFetcher {
    // Connects, runs login -> term -> tables, and always quits the browser.
    async fn fetch(&self) -> Result<(GradeSnapshot, DistributionTable)> {
        let mut caps = DesiredCapabilities::firefox();
        caps.set_headless().map_err(navigation("configure headless firefox"))?;
        let driver = WebDriver::new(self.settings.webdriver_url.as_str(), caps)
            .await
            .map_err(navigation(format!("connect to WebDriver at {}", self.settings.webdriver_url)))?;

        let result = async {
            let session = Session::new(&driver, &self.settings);
            let terms = session.login(&self.credentials).await?;
            session.select_term(&terms, &self.term).await?;
            session.fetch_tables().await
        }
        .await;

        if let Err(e) = driver.quit().await {
            warn!("Failed to quit browser: {}", e);
        }

        result
    }
}
